//! Handle on the overlay database: adjudication ledger plus curator records.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use forge_overlay_core::{Decision, HistoryRow, LedgerRow, OverlayError, OverlayStore};
use rusqlite::Connection;
use serde::Serialize;

use crate::error::{ReconError, Result};
use crate::hash::ContentHash;

/// Current adjudication state of one entity, with the hash typed.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LedgerRecord {
    pub entity_id: String,
    pub last_accepted_hash: ContentHash,
    pub decision: Decision,
    pub kind: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub revision: i64,
    pub last_seen_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerRecord {
    type Error = OverlayError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let last_accepted_hash =
            row.last_hash
                .parse::<ContentHash>()
                .map_err(|reason| OverlayError::InvalidRow {
                    table: "ledger_records",
                    reason: format!("{}: {reason}", row.entity_id),
                })?;
        Ok(Self {
            entity_id: row.entity_id,
            last_accepted_hash,
            decision: row.decision,
            kind: row.kind,
            label: row.label,
            notes: row.notes,
            revision: row.revision,
            last_seen_at: row.last_seen,
        })
    }
}

/// Every current ledger record, keyed by entity id. Drift detection runs
/// against this view rather than the live database.
#[derive(Debug, Clone, Default)]
pub struct LedgerView {
    records: BTreeMap<String, LedgerRecord>,
}

impl LedgerView {
    pub fn from_records(records: impl IntoIterator<Item = LedgerRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| (r.entity_id.clone(), r))
                .collect(),
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<&LedgerRecord> {
        self.records.get(entity_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LedgerRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Ledger {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl Ledger {
    /// Opens (creating when missing) the overlay database and applies the
    /// schema. Each later operation opens its own connection.
    pub fn open(db_path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let ledger = Self {
            db_path,
            busy_timeout,
        };
        let conn = ledger.conn()?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(OverlayError::from)?;
        OverlayStore::migrate(&conn)?;
        tracing::debug!(path = %ledger.db_path.display(), "overlay ledger ready");
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path).map_err(OverlayError::from)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(OverlayError::from)?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(OverlayError::from)?;
        Ok(conn)
    }

    /// Runs a read against a fresh connection; failures surface as
    /// `LedgerUnavailable`.
    pub(crate) fn read<T>(
        &self,
        f: impl FnOnce(&OverlayStore<'_>) -> forge_overlay_core::Result<T>,
    ) -> Result<T> {
        let conn = self.conn()?;
        let store = OverlayStore::new(&conn);
        Ok(f(&store)?)
    }

    /// Runs a curator write against a fresh connection. Rejected input
    /// surfaces as `InvalidInput`, storage failures as `LedgerWriteFailure`
    /// naming `key`.
    pub(crate) fn write<T>(
        &self,
        key: &str,
        f: impl FnOnce(&OverlayStore<'_>) -> forge_overlay_core::Result<T>,
    ) -> Result<T> {
        let conn = self.conn()?;
        let store = OverlayStore::new(&conn);
        f(&store).map_err(|err| match err {
            OverlayError::InvalidInput(reason) => ReconError::InvalidInput(reason),
            source => {
                tracing::error!(key, error = %source, "overlay write failed");
                ReconError::LedgerWriteFailure {
                    entity_id: key.to_string(),
                    source,
                }
            }
        })
    }

    pub fn view(&self) -> Result<LedgerView> {
        let rows = self.read(|store| store.ledger_records())?;
        let records = rows
            .into_iter()
            .map(LedgerRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LedgerView::from_records(records))
    }

    pub fn record(&self, entity_id: &str) -> Result<Option<LedgerRecord>> {
        let row = self.read(|store| store.ledger_record(entity_id))?;
        Ok(row.map(LedgerRecord::try_from).transpose()?)
    }

    /// Adjudication history for one entity, newest first.
    pub fn history(&self, entity_id: &str, limit: Option<usize>) -> Result<Vec<HistoryRow>> {
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        self.read(|store| store.history(entity_id, limit))
    }

    pub(crate) fn history_entry_for_hash(
        &self,
        entity_id: &str,
        hash: &ContentHash,
    ) -> Result<Option<HistoryRow>> {
        self.read(|store| store.history_entry_for_hash(entity_id, hash.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_overlay_core::AdjudicationWrite;
    use serde_json::json;

    const HASH: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn open_creates_parent_dirs_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("nested/world.sqlite"), Duration::from_millis(100))
            .unwrap();
        assert!(ledger.path().exists());
        assert!(ledger.view().unwrap().is_empty());
        assert!(ledger.record("E1").unwrap().is_none());
    }

    #[test]
    fn failed_writes_name_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("world.sqlite"), Duration::from_millis(100)).unwrap();
        let err = ledger
            .write("E1", |store| {
                store
                    .connection()
                    .execute("INSERT INTO no_such_table VALUES (1)", [])
                    .map_err(OverlayError::from)
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ReconError::LedgerWriteFailure { ref entity_id, .. } if entity_id == "E1"
        ));

        let err = ledger
            .write("E1", |_| -> forge_overlay_core::Result<()> {
                Err(OverlayError::InvalidInput("empty".into()))
            })
            .unwrap_err();
        assert!(matches!(err, ReconError::InvalidInput(_)));
    }

    #[test]
    fn view_reflects_applied_writes() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("world.sqlite"), Duration::from_millis(100)).unwrap();
        let conn = ledger.conn().unwrap();
        let attrs = json!({"role": "scientist"});
        OverlayStore::new(&conn)
            .apply_adjudication(&AdjudicationWrite {
                entity_id: "E1",
                content_hash: HASH,
                decision: Decision::Accepted,
                kind: "person",
                label: "Dr. Smith",
                attributes: &attrs,
                notes: None,
                expected_revision: None,
            })
            .unwrap();
        let view = ledger.view().unwrap();
        assert_eq!(view.len(), 1);
        let record = view.get("E1").unwrap();
        assert_eq!(record.last_accepted_hash.as_str(), HASH);
        assert_eq!(record.revision, 1);
        assert_eq!(ledger.history("E1", None).unwrap().len(), 1);
        let hash: ContentHash = HASH.parse().unwrap();
        assert!(ledger.history_entry_for_hash("E1", &hash).unwrap().is_some());
    }
}
