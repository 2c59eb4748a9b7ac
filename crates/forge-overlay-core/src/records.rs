use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{now_timestamp, parse_timestamp, split_list, OverlayError, OverlayStore, Result};

/// Curator-authored persona layered over a source entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Persona {
    pub entity_id: String,
    pub persona_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goals: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<String>,
    pub state: Value,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaDraft {
    pub entity_id: String,
    pub persona_prompt: String,
    #[serde(default)]
    pub goals: Option<String>,
    #[serde(default)]
    pub capabilities: Option<String>,
    #[serde(default)]
    pub state: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpatialBookmark {
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookmarkDraft {
    pub entity_id: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub elevation: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl BookmarkDraft {
    fn validate(&self) -> Result<()> {
        if self.entity_id.trim().is_empty() {
            return Err(OverlayError::InvalidInput("entity_id is required".into()));
        }
        if let Some(lat) = self.latitude {
            if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
                return Err(OverlayError::InvalidInput(format!(
                    "latitude {lat} outside [-90, 90]"
                )));
            }
        }
        if let Some(lon) = self.longitude {
            if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
                return Err(OverlayError::InvalidInput(format!(
                    "longitude {lon} outside [-180, 180]"
                )));
            }
        }
        if let Some(elev) = self.elevation {
            if !elev.is_finite() {
                return Err(OverlayError::InvalidInput("elevation must be finite".into()));
            }
        }
        if self.tags.iter().any(|t| t.contains(',')) {
            return Err(OverlayError::InvalidInput(
                "bookmark tags may not contain commas".into(),
            ));
        }
        Ok(())
    }
}

impl<'c> OverlayStore<'c> {
    pub fn upsert_persona(&self, draft: &PersonaDraft) -> Result<Persona> {
        if draft.entity_id.trim().is_empty() {
            return Err(OverlayError::InvalidInput("entity_id is required".into()));
        }
        if draft.persona_prompt.trim().is_empty() {
            return Err(OverlayError::InvalidInput(
                "persona_prompt must not be empty".into(),
            ));
        }
        let state = draft
            .state
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let now = now_timestamp();
        self.conn.execute(
            "INSERT INTO personas(entity_id,persona_prompt,goals,capabilities,state,created,updated) \
             VALUES(?1,?2,?3,?4,?5,?6,?6) \
             ON CONFLICT(entity_id) DO UPDATE SET \
               persona_prompt=excluded.persona_prompt, \
               goals=excluded.goals, \
               capabilities=excluded.capabilities, \
               state=excluded.state, \
               updated=excluded.updated",
            params![
                draft.entity_id,
                draft.persona_prompt,
                draft.goals,
                draft.capabilities,
                serde_json::to_string(&state)?,
                now,
            ],
        )?;
        self.persona(&draft.entity_id)?
            .ok_or_else(|| OverlayError::InvalidInput("persona vanished after upsert".into()))
    }

    pub fn persona(&self, entity_id: &str) -> Result<Option<Persona>> {
        let raw = self
            .conn
            .query_row(
                "SELECT entity_id,persona_prompt,goals,capabilities,state,created,updated \
                 FROM personas WHERE entity_id=?1",
                params![entity_id],
                read_persona_columns,
            )
            .optional()?;
        raw.map(PersonaColumns::into_persona).transpose()
    }

    pub fn personas(&self) -> Result<Vec<Persona>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id,persona_prompt,goals,capabilities,state,created,updated \
             FROM personas ORDER BY entity_id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_persona_columns(row)?.into_persona()?);
        }
        Ok(out)
    }

    pub fn delete_persona(&self, entity_id: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM personas WHERE entity_id=?1", params![entity_id])?;
        Ok(n > 0)
    }

    pub fn upsert_bookmark(&self, draft: &BookmarkDraft) -> Result<SpatialBookmark> {
        draft.validate()?;
        let tags = if draft.tags.is_empty() {
            None
        } else {
            Some(draft.tags.join(","))
        };
        let now = now_timestamp();
        self.conn.execute(
            "INSERT INTO spatial_bookmarks(entity_id,latitude,longitude,elevation,tags,created,updated) \
             VALUES(?1,?2,?3,?4,?5,?6,?6) \
             ON CONFLICT(entity_id) DO UPDATE SET \
               latitude=excluded.latitude, \
               longitude=excluded.longitude, \
               elevation=excluded.elevation, \
               tags=excluded.tags, \
               updated=excluded.updated",
            params![
                draft.entity_id,
                draft.latitude,
                draft.longitude,
                draft.elevation,
                tags,
                now,
            ],
        )?;
        self.bookmark(&draft.entity_id)?
            .ok_or_else(|| OverlayError::InvalidInput("bookmark vanished after upsert".into()))
    }

    pub fn bookmark(&self, entity_id: &str) -> Result<Option<SpatialBookmark>> {
        let raw = self
            .conn
            .query_row(
                "SELECT entity_id,latitude,longitude,elevation,tags,created,updated \
                 FROM spatial_bookmarks WHERE entity_id=?1",
                params![entity_id],
                read_bookmark_columns,
            )
            .optional()?;
        raw.map(BookmarkColumns::into_bookmark).transpose()
    }

    pub fn bookmarks(&self) -> Result<Vec<SpatialBookmark>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id,latitude,longitude,elevation,tags,created,updated \
             FROM spatial_bookmarks ORDER BY entity_id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_bookmark_columns(row)?.into_bookmark()?);
        }
        Ok(out)
    }

    pub fn delete_bookmark(&self, entity_id: &str) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM spatial_bookmarks WHERE entity_id=?1",
            params![entity_id],
        )?;
        Ok(n > 0)
    }
}

struct PersonaColumns {
    entity_id: String,
    persona_prompt: String,
    goals: Option<String>,
    capabilities: Option<String>,
    state: String,
    created: String,
    updated: String,
}

fn read_persona_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersonaColumns> {
    Ok(PersonaColumns {
        entity_id: row.get(0)?,
        persona_prompt: row.get(1)?,
        goals: row.get(2)?,
        capabilities: row.get(3)?,
        state: row.get(4)?,
        created: row.get(5)?,
        updated: row.get(6)?,
    })
}

impl PersonaColumns {
    fn into_persona(self) -> Result<Persona> {
        // Older rows may hold free text rather than JSON; keep it as a string.
        let state = serde_json::from_str::<Value>(&self.state).unwrap_or(Value::String(self.state));
        Ok(Persona {
            created: parse_timestamp("personas", &self.created)?,
            updated: parse_timestamp("personas", &self.updated)?,
            entity_id: self.entity_id,
            persona_prompt: self.persona_prompt,
            goals: self.goals,
            capabilities: self.capabilities,
            state,
        })
    }
}

struct BookmarkColumns {
    entity_id: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    elevation: Option<f64>,
    tags: Option<String>,
    created: String,
    updated: String,
}

fn read_bookmark_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<BookmarkColumns> {
    Ok(BookmarkColumns {
        entity_id: row.get(0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        elevation: row.get(3)?,
        tags: row.get(4)?,
        created: row.get(5)?,
        updated: row.get(6)?,
    })
}

impl BookmarkColumns {
    fn into_bookmark(self) -> Result<SpatialBookmark> {
        Ok(SpatialBookmark {
            created: parse_timestamp("spatial_bookmarks", &self.created)?,
            updated: parse_timestamp("spatial_bookmarks", &self.updated)?,
            tags: self.tags.as_deref().map(split_list).unwrap_or_default(),
            entity_id: self.entity_id,
            latitude: self.latitude,
            longitude: self.longitude,
            elevation: self.elevation,
        })
    }
}
