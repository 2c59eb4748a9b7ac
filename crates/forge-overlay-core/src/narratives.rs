use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::{now_timestamp, parse_timestamp, OverlayError, OverlayStore, Result};

/// World-level story framing. Not tied to any source entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NarrativeContext {
    pub context_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NarrativeDraft {
    pub context_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub timeline: Option<String>,
}

const NARRATIVE_COLUMNS: &str = "context_id,title,description,mood,timeline,created,updated";

impl<'c> OverlayStore<'c> {
    pub fn upsert_narrative(&self, draft: &NarrativeDraft) -> Result<NarrativeContext> {
        if draft.context_id.trim().is_empty() {
            return Err(OverlayError::InvalidInput("context_id is required".into()));
        }
        if draft.title.trim().is_empty() {
            return Err(OverlayError::InvalidInput("title must not be empty".into()));
        }
        let now = now_timestamp();
        self.conn.execute(
            "INSERT INTO narrative_contexts(context_id,title,description,mood,timeline,created,updated) \
             VALUES(?1,?2,?3,?4,?5,?6,?6) \
             ON CONFLICT(context_id) DO UPDATE SET \
               title=excluded.title, \
               description=excluded.description, \
               mood=excluded.mood, \
               timeline=excluded.timeline, \
               updated=excluded.updated",
            params![
                draft.context_id,
                draft.title,
                draft.description,
                draft.mood,
                draft.timeline,
                now,
            ],
        )?;
        self.narrative(&draft.context_id)?
            .ok_or_else(|| OverlayError::InvalidInput("narrative vanished after upsert".into()))
    }

    pub fn narrative(&self, context_id: &str) -> Result<Option<NarrativeContext>> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {NARRATIVE_COLUMNS} FROM narrative_contexts WHERE context_id=?1"),
                params![context_id],
                read_narrative_columns,
            )
            .optional()?;
        raw.map(NarrativeColumns::into_narrative).transpose()
    }

    /// All contexts ordered by title, then id.
    pub fn narratives(&self) -> Result<Vec<NarrativeContext>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {NARRATIVE_COLUMNS} FROM narrative_contexts ORDER BY title ASC, context_id ASC"
        ))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_narrative_columns(row)?.into_narrative()?);
        }
        Ok(out)
    }

    pub fn delete_narrative(&self, context_id: &str) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM narrative_contexts WHERE context_id=?1",
            params![context_id],
        )?;
        Ok(n > 0)
    }
}

struct NarrativeColumns {
    context_id: String,
    title: String,
    description: Option<String>,
    mood: Option<String>,
    timeline: Option<String>,
    created: String,
    updated: String,
}

fn read_narrative_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<NarrativeColumns> {
    Ok(NarrativeColumns {
        context_id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        mood: row.get(3)?,
        timeline: row.get(4)?,
        created: row.get(5)?,
        updated: row.get(6)?,
    })
}

impl NarrativeColumns {
    fn into_narrative(self) -> Result<NarrativeContext> {
        Ok(NarrativeContext {
            created: parse_timestamp("narrative_contexts", &self.created)?,
            updated: parse_timestamp("narrative_contexts", &self.updated)?,
            context_id: self.context_id,
            title: self.title,
            description: self.description,
            mood: self.mood,
            timeline: self.timeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn draft(id: &str, title: &str) -> NarrativeDraft {
        NarrativeDraft {
            context_id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    #[test]
    fn narratives_list_by_title_and_upsert_in_place() {
        let conn = Connection::open_in_memory().unwrap();
        OverlayStore::migrate(&conn).unwrap();
        let store = OverlayStore::new(&conn);

        let first = store.upsert_narrative(&draft("main", "The Outbreak")).unwrap();
        store.upsert_narrative(&draft("prologue", "Before the Lab")).unwrap();
        let titles: Vec<String> = store.narratives().unwrap().into_iter().map(|n| n.title).collect();
        assert_eq!(titles, vec!["Before the Lab", "The Outbreak"]);

        let updated = store
            .upsert_narrative(&NarrativeDraft {
                mood: Some("tense".into()),
                timeline: Some("1999-2003".into()),
                ..draft("main", "The Outbreak")
            })
            .unwrap();
        assert_eq!(updated.created, first.created);
        assert_eq!(updated.mood.as_deref(), Some("tense"));
        assert_eq!(store.narratives().unwrap().len(), 2);

        assert!(store.delete_narrative("main").unwrap());
        assert!(!store.delete_narrative("main").unwrap());
        assert!(store.narrative("main").unwrap().is_none());
    }

    #[test]
    fn narrative_requires_id_and_title() {
        let conn = Connection::open_in_memory().unwrap();
        OverlayStore::migrate(&conn).unwrap();
        let store = OverlayStore::new(&conn);
        assert!(matches!(
            store.upsert_narrative(&draft(" ", "Title")).unwrap_err(),
            OverlayError::InvalidInput(_)
        ));
        assert!(matches!(
            store.upsert_narrative(&draft("main", "")).unwrap_err(),
            OverlayError::InvalidInput(_)
        ));
    }
}
