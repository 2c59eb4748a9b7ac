//! The single write path into the ledger.

use chrono::{DateTime, Utc};
use forge_overlay_core::{AdjudicationWrite, Decision, OverlayError, OverlayStore};
use serde::Serialize;
use serde_json::Value;

use crate::drift::{DriftEntry, DriftReport, DriftStatus};
use crate::error::{ReconError, Result, StaleReason};
use crate::hash::ContentHash;
use crate::project::Project;

/// A reviewer's verdict on the content they were shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjudicationRequest {
    pub entity_id: String,
    pub decision: Decision,
    pub notes: Option<String>,
    /// Hash of the content the reviewer saw.
    pub expected_hash: ContentHash,
    /// Ledger revision the reviewer saw; when set, a concurrent adjudication
    /// makes this one stale.
    pub expected_revision: Option<i64>,
}

impl AdjudicationRequest {
    pub fn new(entity_id: impl Into<String>, decision: Decision, expected_hash: ContentHash) -> Self {
        Self {
            entity_id: entity_id.into(),
            decision,
            notes: None,
            expected_hash,
            expected_revision: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_revision(mut self, revision: i64) -> Self {
        self.expected_revision = Some(revision);
        self
    }

    /// Request pinned to both the hash and the revision a drift entry was
    /// computed against. Removed entries have no content to adjudicate.
    pub fn from_entry(entry: &DriftEntry, decision: Decision) -> Option<Self> {
        let hash = entry.current_hash.clone()?;
        Some(Self::new(entry.entity_id.clone(), decision, hash).with_revision(entry.ledger_revision))
    }
}

/// A committed adjudication.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Adjudication {
    pub entity_id: String,
    pub decision: Decision,
    pub content_hash: ContentHash,
    pub revision: i64,
    pub decided_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_decision: Option<Decision>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BulkFailure {
    pub entity_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BulkOutcome {
    pub applied: Vec<Adjudication>,
    pub stale: Vec<String>,
    pub failed: Vec<BulkFailure>,
    /// Removed entries, which bulk adjudication leaves alone.
    pub skipped: Vec<String>,
}

impl BulkOutcome {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn is_complete(&self) -> bool {
        self.stale.is_empty() && self.failed.is_empty()
    }
}

impl Project {
    /// Verifies the reviewer's view is still current, then records the
    /// decision in one immediate transaction. Nothing is written on error.
    pub fn adjudicate(&self, request: &AdjudicationRequest) -> Result<Adjudication> {
        let entity_id = request.entity_id.as_str();
        let stale = |reason: StaleReason| {
            tracing::warn!(entity_id, %reason, "stale adjudication refused");
            ReconError::StaleAdjudication {
                entity_id: entity_id.to_string(),
                reason,
            }
        };

        let Some(row) = self.source().get(entity_id)? else {
            return match self.ledger().record(entity_id)? {
                Some(_) => Err(stale(StaleReason::EntityMissing {
                    expected: request.expected_hash.clone(),
                })),
                None => Err(ReconError::UnknownEntity(entity_id.to_string())),
            };
        };
        let entity = row.parse()?;
        if entity.hash != request.expected_hash {
            return Err(stale(StaleReason::HashMismatch {
                expected: request.expected_hash.clone(),
                actual: entity.hash,
            }));
        }

        let attributes = Value::Object(entity.attributes);
        let write = AdjudicationWrite {
            entity_id,
            content_hash: entity.hash.as_str(),
            decision: request.decision,
            kind: &entity.kind,
            label: &entity.label,
            attributes: &attributes,
            notes: request.notes.as_deref(),
            expected_revision: request.expected_revision,
        };
        let conn = self.ledger().conn()?;
        let applied = match OverlayStore::new(&conn).apply_adjudication(&write) {
            Ok(applied) => applied,
            Err(OverlayError::RevisionMismatch {
                expected, actual, ..
            }) => return Err(stale(StaleReason::RevisionMismatch { expected, actual })),
            Err(source) => {
                tracing::error!(entity_id, error = %source, "ledger write rolled back");
                return Err(ReconError::LedgerWriteFailure {
                    entity_id: entity_id.to_string(),
                    source,
                });
            }
        };

        tracing::info!(
            entity_id,
            decision = %request.decision,
            revision = applied.record.revision,
            hash = entity.hash.short(),
            "adjudication committed"
        );
        Ok(Adjudication {
            entity_id: applied.record.entity_id,
            decision: applied.record.decision,
            content_hash: entity.hash,
            revision: applied.record.revision,
            decided_at: applied.record.last_seen,
            notes: applied.record.notes,
            previous_hash: applied.previous.as_ref().map(|p| p.last_hash.clone()),
            previous_decision: applied.previous.map(|p| p.decision),
        })
    }

    /// Applies `decision` to every entry of `report`, each in its own
    /// transaction pinned to the entry's hash and revision.
    pub fn adjudicate_bulk(
        &self,
        report: &DriftReport,
        decision: Decision,
        notes: Option<&str>,
    ) -> Result<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        for entry in &report.entries {
            if entry.status == DriftStatus::Removed {
                outcome.skipped.push(entry.entity_id.clone());
                continue;
            }
            let Some(mut request) = AdjudicationRequest::from_entry(entry, decision) else {
                outcome.skipped.push(entry.entity_id.clone());
                continue;
            };
            request.notes = notes.map(str::to_string);
            match self.adjudicate(&request) {
                Ok(done) => outcome.applied.push(done),
                Err(err) if err.is_stale() => outcome.stale.push(entry.entity_id.clone()),
                // An unreachable source fails every remaining entry the same way.
                Err(err @ ReconError::SourceUnavailable { .. }) => return Err(err),
                Err(err) => outcome.failed.push(BulkFailure {
                    entity_id: entry.entity_id.clone(),
                    error: err.to_string(),
                }),
            }
        }
        tracing::info!(
            applied = outcome.applied.len(),
            stale = outcome.stale.len(),
            failed = outcome.failed.len(),
            skipped = outcome.skipped.len(),
            decision = %decision,
            "bulk adjudication finished"
        );
        Ok(outcome)
    }
}
