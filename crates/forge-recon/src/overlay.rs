//! Curator enrichment records, annotated with the drift state of the entity
//! they reference.

use forge_overlay_core::{
    BookmarkDraft, NarrativeContext, NarrativeDraft, Persona, PersonaDraft, SpatialBookmark,
};
use serde::Serialize;

use crate::drift::{classify, Classification};
use crate::error::{ReconError, Result};
use crate::ledger::{LedgerRecord, LedgerView};
use crate::model::{Entity, SourceEntity};
use crate::project::Project;
use crate::source::SourceSnapshot;

/// Why an overlay record may no longer describe its entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverlayWarning {
    /// Source content moved since the last adjudication.
    Changed,
    /// The entity left the source after being adjudicated.
    Removed,
    /// The entity is not in the source and was never adjudicated.
    Missing,
    /// The source row exists but its attributes cannot be read.
    Malformed { reason: String },
}

impl std::fmt::Display for OverlayWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlayWarning::Changed => f.write_str("source entity changed since last review"),
            OverlayWarning::Removed => f.write_str("source entity removed"),
            OverlayWarning::Missing => f.write_str("source entity not found"),
            OverlayWarning::Malformed { reason } => write!(f, "source entity malformed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OverlayView<T> {
    #[serde(flatten)]
    pub record: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<OverlayWarning>,
}

fn warning_for(source: Option<&SourceEntity>, record: Option<&LedgerRecord>) -> Option<OverlayWarning> {
    let Some(source) = source else {
        return Some(match record {
            Some(_) => OverlayWarning::Removed,
            None => OverlayWarning::Missing,
        });
    };
    match source.parse() {
        Err(ReconError::MalformedAttributes { reason, .. }) => Some(OverlayWarning::Malformed { reason }),
        Err(other) => Some(OverlayWarning::Malformed {
            reason: other.to_string(),
        }),
        Ok(entity) => match classify(Some(&entity.hash), record) {
            Classification::Changed => Some(OverlayWarning::Changed),
            _ => None,
        },
    }
}

/// Source and ledger state captured once for annotating a whole list.
struct Annotator {
    snapshot: SourceSnapshot,
    ledger: LedgerView,
}

impl Annotator {
    fn capture(project: &Project) -> Result<Self> {
        Ok(Self {
            snapshot: project.snapshot()?,
            ledger: project.ledger().view()?,
        })
    }

    fn wrap<T>(&self, entity_id: &str, record: T) -> OverlayView<T> {
        let warning = warning_for(self.snapshot.get(entity_id), self.ledger.get(entity_id));
        if let Some(w @ (OverlayWarning::Removed | OverlayWarning::Missing)) = &warning {
            tracing::warn!(entity_id, warning = %w, "overlay record references an entity absent from the source");
        }
        OverlayView { record, warning }
    }
}

impl Project {
    fn annotate<T>(&self, entity_id: &str, record: T) -> Result<OverlayView<T>> {
        let source = self.source().get(entity_id)?;
        let ledger = self.ledger().record(entity_id)?;
        Ok(OverlayView {
            warning: warning_for(source.as_ref(), ledger.as_ref()),
            record,
        })
    }

    fn require_entity(&self, entity_id: &str) -> Result<()> {
        match self.source().get(entity_id)? {
            Some(_) => Ok(()),
            None => Err(ReconError::UnknownEntity(entity_id.to_string())),
        }
    }

    /// Creates or replaces the persona of an entity present in the source.
    pub fn save_persona(&self, draft: &PersonaDraft) -> Result<OverlayView<Persona>> {
        self.require_entity(&draft.entity_id)?;
        let persona = self
            .ledger()
            .write(&draft.entity_id, |store| store.upsert_persona(draft))?;
        tracing::debug!(entity_id = %persona.entity_id, "persona saved");
        self.annotate(&draft.entity_id, persona)
    }

    pub fn persona(&self, entity_id: &str) -> Result<Option<OverlayView<Persona>>> {
        match self.ledger().read(|store| store.persona(entity_id))? {
            Some(persona) => self.annotate(entity_id, persona).map(Some),
            None => Ok(None),
        }
    }

    pub fn personas(&self) -> Result<Vec<OverlayView<Persona>>> {
        let personas = self.ledger().read(|store| store.personas())?;
        let annotator = Annotator::capture(self)?;
        Ok(personas
            .into_iter()
            .map(|p| {
                let id = p.entity_id.clone();
                annotator.wrap(&id, p)
            })
            .collect())
    }

    pub fn delete_persona(&self, entity_id: &str) -> Result<bool> {
        self.ledger()
            .write(entity_id, |store| store.delete_persona(entity_id))
    }

    /// Creates or replaces the spatial bookmark of an entity present in the
    /// source.
    pub fn save_bookmark(&self, draft: &BookmarkDraft) -> Result<OverlayView<SpatialBookmark>> {
        self.require_entity(&draft.entity_id)?;
        let bookmark = self
            .ledger()
            .write(&draft.entity_id, |store| store.upsert_bookmark(draft))?;
        tracing::debug!(entity_id = %bookmark.entity_id, "bookmark saved");
        self.annotate(&draft.entity_id, bookmark)
    }

    pub fn bookmark(&self, entity_id: &str) -> Result<Option<OverlayView<SpatialBookmark>>> {
        match self.ledger().read(|store| store.bookmark(entity_id))? {
            Some(bookmark) => self.annotate(entity_id, bookmark).map(Some),
            None => Ok(None),
        }
    }

    pub fn bookmarks(&self) -> Result<Vec<OverlayView<SpatialBookmark>>> {
        let bookmarks = self.ledger().read(|store| store.bookmarks())?;
        let annotator = Annotator::capture(self)?;
        Ok(bookmarks
            .into_iter()
            .map(|b| {
                let id = b.entity_id.clone();
                annotator.wrap(&id, b)
            })
            .collect())
    }

    pub fn delete_bookmark(&self, entity_id: &str) -> Result<bool> {
        self.ledger()
            .write(entity_id, |store| store.delete_bookmark(entity_id))
    }

    /// Creates or replaces a narrative context. Contexts frame the whole
    /// world, so no source entity is consulted.
    pub fn save_narrative(&self, draft: &NarrativeDraft) -> Result<NarrativeContext> {
        let context = self
            .ledger()
            .write(&draft.context_id, |store| store.upsert_narrative(draft))?;
        tracing::debug!(context_id = %context.context_id, "narrative context saved");
        Ok(context)
    }

    pub fn narrative(&self, context_id: &str) -> Result<Option<NarrativeContext>> {
        self.ledger().read(|store| store.narrative(context_id))
    }

    pub fn narratives(&self) -> Result<Vec<NarrativeContext>> {
        self.ledger().read(|store| store.narratives())
    }

    pub fn delete_narrative(&self, context_id: &str) -> Result<bool> {
        self.ledger()
            .write(context_id, |store| store.delete_narrative(context_id))
    }

    /// Source entities of a promotable kind that have no persona yet, sorted
    /// by label then id. Malformed rows are skipped.
    pub fn promotable_entities(&self) -> Result<Vec<Entity>> {
        let snapshot = self.snapshot()?;
        let personas = self.ledger().read(|store| store.personas())?;
        let has_persona: std::collections::BTreeSet<&str> =
            personas.iter().map(|p| p.entity_id.as_str()).collect();
        let kinds = self.projects_config();
        let mut out: Vec<Entity> = snapshot
            .iter()
            .filter(|row| kinds.is_promotable(&row.kind) && !has_persona.contains(row.id.as_str()))
            .filter_map(|row| row.parse().ok())
            .collect();
        out.sort_by(|a, b| (&a.label, &a.id).cmp(&(&b.label, &b.id)));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjudicate::AdjudicationRequest;
    use crate::config::ReconConfig;
    use crate::ledger::Ledger;
    use crate::source::StaticSource;
    use forge_overlay_core::Decision;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup(dir: &std::path::Path, entities: Vec<SourceEntity>) -> (Project, Arc<StaticSource>) {
        let source = Arc::new(StaticSource::new(entities));
        let ledger = Ledger::open(dir.join("world.sqlite"), Duration::from_millis(500)).unwrap();
        let project = Project::from_parts("t", source.clone(), ledger, &ReconConfig::default());
        (project, source)
    }

    fn persona_draft(id: &str) -> PersonaDraft {
        PersonaDraft {
            entity_id: id.into(),
            persona_prompt: "You are a careful scientist.".into(),
            ..Default::default()
        }
    }

    #[test]
    fn persona_requires_source_entity() {
        let dir = tempfile::tempdir().unwrap();
        let (project, _) = setup(dir.path(), vec![]);
        let err = project.save_persona(&persona_draft("ghost")).unwrap_err();
        assert!(matches!(err, ReconError::UnknownEntity(_)));
    }

    #[test]
    fn warnings_follow_source_changes() {
        let dir = tempfile::tempdir().unwrap();
        let e = SourceEntity::new("E1", "PERSON", "Dr. Smith", json!({"role": "scientist"}));
        let (project, source) = setup(dir.path(), vec![e.clone()]);
        let hash = e.parse().unwrap().hash;
        project
            .adjudicate(&AdjudicationRequest::new("E1", Decision::Accepted, hash))
            .unwrap();
        let saved = project.save_persona(&persona_draft("E1")).unwrap();
        assert!(saved.warning.is_none());

        source.replace([SourceEntity::new(
            "E1",
            "PERSON",
            "Dr. Smith",
            json!({"role": "scientist", "affiliation": "Lab7"}),
        )]);
        let view = project.persona("E1").unwrap().unwrap();
        assert_eq!(view.warning, Some(OverlayWarning::Changed));

        source.replace([]);
        let list = project.personas().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].warning, Some(OverlayWarning::Removed));
        // The record outlives its entity.
        assert_eq!(list[0].record.persona_prompt, "You are a careful scientist.");
    }

    #[test]
    fn bookmarks_validate_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let (project, _) = setup(
            dir.path(),
            vec![SourceEntity::new("L1", "LOCATION", "Lab7", json!({}))],
        );
        let bad = BookmarkDraft {
            entity_id: "L1".into(),
            latitude: Some(123.0),
            ..Default::default()
        };
        assert!(matches!(
            project.save_bookmark(&bad).unwrap_err(),
            ReconError::InvalidInput(_)
        ));
        let good = BookmarkDraft {
            entity_id: "L1".into(),
            latitude: Some(47.56),
            longitude: Some(7.59),
            tags: vec!["lab".into()],
            ..Default::default()
        };
        let saved = project.save_bookmark(&good).unwrap();
        assert_eq!(saved.record.tags, vec!["lab".to_string()]);
        assert_eq!(project.bookmarks().unwrap().len(), 1);
        assert!(project.delete_bookmark("L1").unwrap());
        assert!(!project.delete_bookmark("L1").unwrap());
        assert!(project.bookmark("L1").unwrap().is_none());
    }

    #[test]
    fn narratives_need_no_source_entity() {
        let dir = tempfile::tempdir().unwrap();
        let (project, _) = setup(dir.path(), vec![]);
        assert!(matches!(
            project
                .save_narrative(&NarrativeDraft {
                    context_id: "main".into(),
                    ..Default::default()
                })
                .unwrap_err(),
            ReconError::InvalidInput(_)
        ));
        let saved = project
            .save_narrative(&NarrativeDraft {
                context_id: "main".into(),
                title: "The Outbreak".into(),
                mood: Some("tense".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(saved.mood.as_deref(), Some("tense"));
        assert_eq!(project.narratives().unwrap().len(), 1);
        assert_eq!(project.narrative("main").unwrap().unwrap().title, "The Outbreak");
        assert!(project.delete_narrative("main").unwrap());
        assert!(project.narrative("main").unwrap().is_none());
    }

    #[test]
    fn promotable_excludes_existing_personas_and_other_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let (project, _) = setup(
            dir.path(),
            vec![
                SourceEntity::new("P2", "PERSON", "Zoe", json!({})),
                SourceEntity::new("P1", "person", "Adam", json!({})),
                SourceEntity::new("O1", "ORGANIZATION", "Lab7 Inc", json!({})),
                SourceEntity::new("L1", "LOCATION", "Basel", json!({})),
            ],
        );
        project.save_persona(&persona_draft("P2")).unwrap();
        let ids: Vec<String> = project
            .promotable_entities()
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["P1".to_string(), "O1".to_string()]);
    }
}
