//! Drift classification of a source snapshot against the ledger.
//!
//! `detect` is pure: it reads nothing but its arguments, so two calls with
//! the same snapshot and ledger view produce identical reports.

use forge_overlay_core::Decision;
use serde::{Deserialize, Serialize};

use crate::error::ReconError;
use crate::hash::ContentHash;
use crate::ledger::{LedgerRecord, LedgerView};
use crate::source::SourceSnapshot;

/// Status of an entity that needs review. Variant order is report order.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    Removed,
    Changed,
    New,
    /// Only reported when `DriftOptions::resurface_deferred` is set.
    Deferred,
}

impl DriftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftStatus::Removed => "removed",
            DriftStatus::Changed => "changed",
            DriftStatus::New => "new",
            DriftStatus::Deferred => "deferred",
        }
    }
}

impl std::fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Full classification, including the states that are never reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    New,
    Changed,
    Removed,
    Unchanged,
    UnchangedRejected,
    UnchangedDeferred,
}

/// Classifies one entity from its current hash (None when it left the
/// source) and its ledger record.
pub fn classify(current: Option<&ContentHash>, record: Option<&LedgerRecord>) -> Classification {
    match (current, record) {
        (None, _) => Classification::Removed,
        (Some(_), None) => Classification::New,
        (Some(hash), Some(record)) if *hash != record.last_accepted_hash => {
            Classification::Changed
        }
        (Some(_), Some(record)) => match record.decision {
            Decision::Accepted => Classification::Unchanged,
            Decision::Rejected => Classification::UnchangedRejected,
            Decision::Deferred => Classification::UnchangedDeferred,
        },
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DriftEntry {
    pub entity_id: String,
    pub status: DriftStatus,
    pub kind: String,
    pub label: String,
    /// None for removed entities.
    pub current_hash: Option<ContentHash>,
    pub previous_hash: Option<ContentHash>,
    pub previous_decision: Option<Decision>,
    /// Ledger revision the entry was computed against; 0 when no record exists.
    pub ledger_revision: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DriftSummary {
    pub scanned: usize,
    pub new: usize,
    pub changed: usize,
    pub removed: usize,
    pub deferred: usize,
    pub unchanged: usize,
    pub unchanged_rejected: usize,
    pub unchanged_deferred: usize,
    pub malformed: usize,
}

/// Entity skipped during the scan because its attributes could not be
/// canonicalized.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DriftWarning {
    pub entity_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DriftReport {
    pub entries: Vec<DriftEntry>,
    pub summary: DriftSummary,
    pub warnings: Vec<DriftWarning>,
}

impl DriftReport {
    pub fn entry(&self, entity_id: &str) -> Option<&DriftEntry> {
        self.entries.iter().find(|e| e.entity_id == entity_id)
    }

    pub fn status_of(&self, entity_id: &str) -> Option<DriftStatus> {
        self.entry(entity_id).map(|e| e.status)
    }

    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriftOptions {
    pub resurface_deferred: bool,
}

pub fn detect(snapshot: &SourceSnapshot, ledger: &LedgerView, options: DriftOptions) -> DriftReport {
    let mut report = DriftReport::default();

    for source in snapshot.iter() {
        report.summary.scanned += 1;
        let entity = match source.parse() {
            Ok(entity) => entity,
            Err(err) => {
                let reason = match err {
                    ReconError::MalformedAttributes { reason, .. } => reason,
                    other => other.to_string(),
                };
                tracing::warn!(entity_id = %source.id, %reason, "skipping entity with malformed attributes");
                report.summary.malformed += 1;
                report.warnings.push(DriftWarning {
                    entity_id: source.id.clone(),
                    reason,
                });
                continue;
            }
        };
        let record = ledger.get(&entity.id);
        let status = match classify(Some(&entity.hash), record) {
            Classification::New => {
                report.summary.new += 1;
                DriftStatus::New
            }
            Classification::Changed => {
                report.summary.changed += 1;
                DriftStatus::Changed
            }
            Classification::UnchangedDeferred if options.resurface_deferred => {
                report.summary.deferred += 1;
                DriftStatus::Deferred
            }
            Classification::UnchangedDeferred => {
                report.summary.unchanged_deferred += 1;
                continue;
            }
            Classification::UnchangedRejected => {
                report.summary.unchanged_rejected += 1;
                continue;
            }
            Classification::Unchanged | Classification::Removed => {
                report.summary.unchanged += 1;
                continue;
            }
        };
        report.entries.push(DriftEntry {
            entity_id: entity.id,
            status,
            kind: entity.kind,
            label: entity.label,
            current_hash: Some(entity.hash),
            previous_hash: record.map(|r| r.last_accepted_hash.clone()),
            previous_decision: record.map(|r| r.decision),
            ledger_revision: record.map(|r| r.revision).unwrap_or(0),
        });
    }

    for record in ledger.iter() {
        // Present-but-malformed entities are not removed; they already carry a warning.
        if snapshot.contains(&record.entity_id) {
            continue;
        }
        report.summary.removed += 1;
        report.entries.push(DriftEntry {
            entity_id: record.entity_id.clone(),
            status: DriftStatus::Removed,
            kind: record.kind.clone(),
            label: record.label.clone(),
            current_hash: None,
            previous_hash: Some(record.last_accepted_hash.clone()),
            previous_decision: Some(record.decision),
            ledger_revision: record.revision,
        });
    }

    report.entries.sort_by(|a, b| {
        (a.status, &a.kind, &a.label, &a.entity_id).cmp(&(b.status, &b.kind, &b.label, &b.entity_id))
    });
    tracing::debug!(
        scanned = report.summary.scanned,
        new = report.summary.new,
        changed = report.summary.changed,
        removed = report.summary.removed,
        malformed = report.summary.malformed,
        "drift detected"
    );
    report
}
