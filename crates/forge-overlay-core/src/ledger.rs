use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use serde_json::Value;

use crate::{now_timestamp, parse_timestamp, Decision, OverlayError, OverlayStore, Result};

const LEDGER_COLUMNS: &str = "entity_id,last_hash,decision,kind,label,notes,revision,last_seen";
const HISTORY_COLUMNS: &str =
    "entity_id,seq,content_hash,decision,kind,label,attributes,notes,decided_at";

/// Current adjudication state of one entity.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LedgerRow {
    pub entity_id: String,
    pub last_hash: String,
    pub decision: Decision,
    pub kind: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub revision: i64,
    pub last_seen: DateTime<Utc>,
}

/// One immutable entry of the adjudication audit trail.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryRow {
    pub entity_id: String,
    pub seq: i64,
    pub content_hash: String,
    pub decision: Decision,
    pub kind: String,
    pub label: String,
    pub attributes: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub decided_at: DateTime<Utc>,
}

pub struct AdjudicationWrite<'a> {
    pub entity_id: &'a str,
    pub content_hash: &'a str,
    pub decision: Decision,
    pub kind: &'a str,
    pub label: &'a str,
    pub attributes: &'a Value,
    pub notes: Option<&'a str>,
    /// When set, the write only applies if the current revision still matches.
    pub expected_revision: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedAdjudication {
    pub record: LedgerRow,
    pub history: HistoryRow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<LedgerRow>,
}

impl<'c> OverlayStore<'c> {
    pub fn ledger_record(&self, entity_id: &str) -> Result<Option<LedgerRow>> {
        let sql = format!("SELECT {LEDGER_COLUMNS} FROM ledger_records WHERE entity_id=?1");
        let raw = self
            .conn
            .query_row(&sql, params![entity_id], read_ledger_columns)
            .optional()?;
        raw.map(LedgerColumns::into_row).transpose()
    }

    pub fn ledger_records(&self) -> Result<Vec<LedgerRow>> {
        let sql = format!("SELECT {LEDGER_COLUMNS} FROM ledger_records ORDER BY entity_id ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_ledger_columns(row)?.into_row()?);
        }
        Ok(out)
    }

    pub fn ledger_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM ledger_records", [], |row| row.get(0))?)
    }

    /// History for one entity, newest first.
    pub fn history(&self, entity_id: &str, limit: i64) -> Result<Vec<HistoryRow>> {
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM adjudication_history \
             WHERE entity_id=?1 ORDER BY seq DESC LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![entity_id, limit])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_history_columns(row)?.into_row()?);
        }
        Ok(out)
    }

    /// Latest history entry that recorded `content_hash` for the entity.
    pub fn history_entry_for_hash(
        &self,
        entity_id: &str,
        content_hash: &str,
    ) -> Result<Option<HistoryRow>> {
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM adjudication_history \
             WHERE entity_id=?1 AND content_hash=?2 ORDER BY seq DESC LIMIT 1"
        );
        let raw = self
            .conn
            .query_row(&sql, params![entity_id, content_hash], read_history_columns)
            .optional()?;
        raw.map(HistoryColumns::into_row).transpose()
    }

    /// Appends a history entry and replaces the entity's current record in one
    /// immediate transaction. Either both writes land or neither does.
    pub fn apply_adjudication(&self, write: &AdjudicationWrite<'_>) -> Result<AppliedAdjudication> {
        let attributes = serde_json::to_string(write.attributes)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let previous = {
            let sql = format!("SELECT {LEDGER_COLUMNS} FROM ledger_records WHERE entity_id=?1");
            tx.query_row(&sql, params![write.entity_id], read_ledger_columns)
                .optional()?
                .map(LedgerColumns::into_row)
                .transpose()?
        };
        let current_revision = previous.as_ref().map(|row| row.revision).unwrap_or(0);
        if let Some(expected) = write.expected_revision {
            if expected != current_revision {
                // Dropping the transaction rolls it back.
                return Err(OverlayError::RevisionMismatch {
                    entity_id: write.entity_id.to_string(),
                    expected,
                    actual: current_revision,
                });
            }
        }

        let revision = current_revision + 1;
        let now = now_timestamp();
        tx.execute(
            "INSERT INTO adjudication_history(entity_id,seq,content_hash,decision,kind,label,attributes,notes,decided_at) \
             VALUES(?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                write.entity_id,
                revision,
                write.content_hash,
                write.decision.as_str(),
                write.kind,
                write.label,
                attributes,
                write.notes,
                now,
            ],
        )?;
        tx.execute(
            "INSERT INTO ledger_records(entity_id,last_hash,decision,kind,label,notes,revision,last_seen) \
             VALUES(?1,?2,?3,?4,?5,?6,?7,?8) \
             ON CONFLICT(entity_id) DO UPDATE SET \
               last_hash=excluded.last_hash, \
               decision=excluded.decision, \
               kind=excluded.kind, \
               label=excluded.label, \
               notes=excluded.notes, \
               revision=excluded.revision, \
               last_seen=excluded.last_seen",
            params![
                write.entity_id,
                write.content_hash,
                write.decision.as_str(),
                write.kind,
                write.label,
                write.notes,
                revision,
                now,
            ],
        )?;
        tx.commit()?;

        let decided_at = parse_timestamp("adjudication_history", &now)?;
        tracing::debug!(
            entity_id = write.entity_id,
            revision,
            decision = write.decision.as_str(),
            "ledger record replaced"
        );
        Ok(AppliedAdjudication {
            record: LedgerRow {
                entity_id: write.entity_id.to_string(),
                last_hash: write.content_hash.to_string(),
                decision: write.decision,
                kind: write.kind.to_string(),
                label: write.label.to_string(),
                notes: write.notes.map(|s| s.to_string()),
                revision,
                last_seen: decided_at,
            },
            history: HistoryRow {
                entity_id: write.entity_id.to_string(),
                seq: revision,
                content_hash: write.content_hash.to_string(),
                decision: write.decision,
                kind: write.kind.to_string(),
                label: write.label.to_string(),
                attributes: write.attributes.clone(),
                notes: write.notes.map(|s| s.to_string()),
                decided_at,
            },
            previous,
        })
    }
}

// Raw column tuples keep the rusqlite closures infallible beyond SQL errors;
// decoding into typed rows happens afterwards.
struct LedgerColumns {
    entity_id: String,
    last_hash: String,
    decision: String,
    kind: String,
    label: String,
    notes: Option<String>,
    revision: i64,
    last_seen: String,
}

fn read_ledger_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerColumns> {
    Ok(LedgerColumns {
        entity_id: row.get(0)?,
        last_hash: row.get(1)?,
        decision: row.get(2)?,
        kind: row.get(3)?,
        label: row.get(4)?,
        notes: row.get(5)?,
        revision: row.get(6)?,
        last_seen: row.get(7)?,
    })
}

impl LedgerColumns {
    fn into_row(self) -> Result<LedgerRow> {
        Ok(LedgerRow {
            decision: decode_decision("ledger_records", &self.decision)?,
            last_seen: parse_timestamp("ledger_records", &self.last_seen)?,
            entity_id: self.entity_id,
            last_hash: self.last_hash,
            kind: self.kind,
            label: self.label,
            notes: self.notes,
            revision: self.revision,
        })
    }
}

struct HistoryColumns {
    entity_id: String,
    seq: i64,
    content_hash: String,
    decision: String,
    kind: String,
    label: String,
    attributes: String,
    notes: Option<String>,
    decided_at: String,
}

fn read_history_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryColumns> {
    Ok(HistoryColumns {
        entity_id: row.get(0)?,
        seq: row.get(1)?,
        content_hash: row.get(2)?,
        decision: row.get(3)?,
        kind: row.get(4)?,
        label: row.get(5)?,
        attributes: row.get(6)?,
        notes: row.get(7)?,
        decided_at: row.get(8)?,
    })
}

impl HistoryColumns {
    fn into_row(self) -> Result<HistoryRow> {
        let attributes =
            serde_json::from_str(&self.attributes).map_err(|err| OverlayError::InvalidRow {
                table: "adjudication_history",
                reason: format!("attributes for {}#{}: {err}", self.entity_id, self.seq),
            })?;
        Ok(HistoryRow {
            decision: decode_decision("adjudication_history", &self.decision)?,
            decided_at: parse_timestamp("adjudication_history", &self.decided_at)?,
            attributes,
            entity_id: self.entity_id,
            seq: self.seq,
            content_hash: self.content_hash,
            kind: self.kind,
            label: self.label,
            notes: self.notes,
        })
    }
}

fn decode_decision(table: &'static str, raw: &str) -> Result<Decision> {
    Decision::from_slug(raw).ok_or_else(|| OverlayError::InvalidRow {
        table,
        reason: format!("unknown decision '{raw}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use serde_json::json;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        OverlayStore::migrate(&conn).unwrap();
        conn
    }

    fn write<'a>(
        entity_id: &'a str,
        hash: &'a str,
        decision: Decision,
        attributes: &'a Value,
    ) -> AdjudicationWrite<'a> {
        AdjudicationWrite {
            entity_id,
            content_hash: hash,
            decision,
            kind: "person",
            label: "Dr. Smith",
            attributes,
            notes: None,
            expected_revision: None,
        }
    }

    #[test]
    fn upsert_replaces_current_row_and_appends_history() {
        let conn = setup_conn();
        let store = OverlayStore::new(&conn);
        let v1 = json!({"role": "scientist"});
        let v2 = json!({"role": "scientist", "affiliation": "Lab7"});

        let first = store
            .apply_adjudication(&write("E1", "h1", Decision::Accepted, &v1))
            .unwrap();
        assert_eq!(first.record.revision, 1);
        assert!(first.previous.is_none());

        let second = store
            .apply_adjudication(&write("E1", "h2", Decision::Rejected, &v2))
            .unwrap();
        assert_eq!(second.record.revision, 2);
        assert_eq!(second.previous.as_ref().unwrap().last_hash, "h1");

        assert_eq!(store.ledger_count().unwrap(), 1);
        let current = store.ledger_record("E1").unwrap().unwrap();
        assert_eq!(current.last_hash, "h2");
        assert_eq!(current.decision, Decision::Rejected);

        let history = store.history("E1", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].seq, 2);
        assert_eq!(history[1].seq, 1);
        assert_eq!(history[1].attributes, v1);
    }

    #[test]
    fn history_entry_for_hash_returns_latest_match() {
        let conn = setup_conn();
        let store = OverlayStore::new(&conn);
        let v1 = json!({"role": "scientist"});
        store
            .apply_adjudication(&write("E1", "h1", Decision::Deferred, &v1))
            .unwrap();
        store
            .apply_adjudication(&write("E1", "h1", Decision::Accepted, &v1))
            .unwrap();
        let entry = store.history_entry_for_hash("E1", "h1").unwrap().unwrap();
        assert_eq!(entry.seq, 2);
        assert_eq!(entry.decision, Decision::Accepted);
        assert!(store.history_entry_for_hash("E1", "nope").unwrap().is_none());
    }

    #[test]
    fn revision_mismatch_leaves_state_untouched() {
        let conn = setup_conn();
        let store = OverlayStore::new(&conn);
        let v1 = json!({});
        store
            .apply_adjudication(&write("E1", "h1", Decision::Accepted, &v1))
            .unwrap();

        let mut stale = write("E1", "h2", Decision::Accepted, &v1);
        stale.expected_revision = Some(0);
        let err = store.apply_adjudication(&stale).unwrap_err();
        assert!(matches!(
            err,
            OverlayError::RevisionMismatch {
                expected: 0,
                actual: 1,
                ..
            }
        ));
        assert_eq!(store.ledger_record("E1").unwrap().unwrap().last_hash, "h1");
        assert_eq!(store.history("E1", 10).unwrap().len(), 1);

        // The rolled-back transaction must not leave the connection mid-transaction.
        assert!(conn.is_autocommit());
    }

    #[test]
    fn history_and_ledger_rows_cannot_be_deleted() {
        let conn = setup_conn();
        let store = OverlayStore::new(&conn);
        let v1 = json!({});
        store
            .apply_adjudication(&write("E1", "h1", Decision::Accepted, &v1))
            .unwrap();
        assert!(conn
            .execute("DELETE FROM adjudication_history WHERE entity_id='E1'", [])
            .is_err());
        assert!(conn
            .execute("UPDATE adjudication_history SET decision='rejected'", [])
            .is_err());
        assert!(conn
            .execute("DELETE FROM ledger_records WHERE entity_id='E1'", [])
            .is_err());
        assert_eq!(store.history("E1", 10).unwrap().len(), 1);
    }

    #[test]
    fn unknown_decision_in_row_is_reported() {
        let conn = setup_conn();
        conn.execute(
            "INSERT INTO ledger_records(entity_id,last_hash,decision,kind,label,notes,revision,last_seen) \
             VALUES('X','h','approved','k','l',NULL,1,'2024-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();
        let store = OverlayStore::new(&conn);
        let err = store.ledger_record("X").unwrap_err();
        assert!(matches!(err, OverlayError::InvalidRow { .. }));
    }
}
