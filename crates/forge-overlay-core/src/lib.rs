//! Core SQLite helpers backing the curator overlay store: schema migrations,
//! the adjudication ledger (current state + append-only history), the
//! enrichment records curators attach to source entities and world-level
//! narrative contexts.
//!
//! Nothing in this crate knows about the source store. Entity ids are plain
//! values here; existence checks against the source happen one layer up.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

mod ledger;
mod narratives;
mod records;

pub use ledger::{AdjudicationWrite, AppliedAdjudication, HistoryRow, LedgerRow};
pub use narratives::{NarrativeContext, NarrativeDraft};
pub use records::{BookmarkDraft, Persona, PersonaDraft, SpatialBookmark};

pub const SCHEMA_VERSION: &str = "1";

#[derive(thiserror::Error, Debug)]
pub enum OverlayError {
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("revision mismatch for {entity_id} (expected={expected}, actual={actual})")]
    RevisionMismatch {
        entity_id: String,
        expected: i64,
        actual: i64,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid row in {table}: {reason}")]
    InvalidRow { table: &'static str, reason: String },
}

pub type Result<T, E = OverlayError> = std::result::Result<T, E>;

/// Reviewer verdict recorded against an entity's content hash.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accepted,
    Rejected,
    Deferred,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Accepted => "accepted",
            Decision::Rejected => "rejected",
            Decision::Deferred => "deferred",
        }
    }

    pub fn from_slug(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "accepted" | "accept" => Some(Decision::Accepted),
            "rejected" | "reject" | "ignore" => Some(Decision::Rejected),
            "deferred" | "defer" => Some(Decision::Deferred),
            _ => None,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Lightweight wrapper around a `rusqlite::Connection` that exposes the
/// overlay-specific helpers (schema setup, ledger writes, record CRUD).
pub struct OverlayStore<'c> {
    conn: &'c Connection,
}

impl<'c> OverlayStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    pub fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            -- Current adjudication state: exactly one row per entity.
            CREATE TABLE IF NOT EXISTS ledger_records (
              entity_id TEXT PRIMARY KEY,
              last_hash TEXT NOT NULL,
              decision TEXT NOT NULL,
              kind TEXT NOT NULL,
              label TEXT NOT NULL,
              notes TEXT,
              revision INTEGER NOT NULL,
              last_seen TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ledger_decision ON ledger_records(decision);

            -- Audit trail: one row per adjudication, never rewritten.
            CREATE TABLE IF NOT EXISTS adjudication_history (
              entity_id TEXT NOT NULL,
              seq INTEGER NOT NULL,
              content_hash TEXT NOT NULL,
              decision TEXT NOT NULL,
              kind TEXT NOT NULL,
              label TEXT NOT NULL,
              attributes TEXT NOT NULL,
              notes TEXT,
              decided_at TEXT NOT NULL,
              PRIMARY KEY (entity_id, seq)
            );
            CREATE INDEX IF NOT EXISTS idx_history_hash ON adjudication_history(entity_id, content_hash);

            CREATE TRIGGER IF NOT EXISTS adjudication_history_no_update
            BEFORE UPDATE ON adjudication_history
            BEGIN
              SELECT RAISE(ABORT, 'adjudication_history is append-only');
            END;
            CREATE TRIGGER IF NOT EXISTS adjudication_history_no_delete
            BEFORE DELETE ON adjudication_history
            BEGIN
              SELECT RAISE(ABORT, 'adjudication_history is append-only');
            END;
            CREATE TRIGGER IF NOT EXISTS ledger_records_no_delete
            BEFORE DELETE ON ledger_records
            BEGIN
              SELECT RAISE(ABORT, 'ledger_records are superseded, never deleted');
            END;

            CREATE TABLE IF NOT EXISTS personas (
              entity_id TEXT PRIMARY KEY,
              persona_prompt TEXT NOT NULL,
              goals TEXT,
              capabilities TEXT,
              state TEXT NOT NULL,
              created TEXT NOT NULL,
              updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS spatial_bookmarks (
              entity_id TEXT PRIMARY KEY,
              latitude REAL,
              longitude REAL,
              elevation REAL,
              tags TEXT,
              created TEXT NOT NULL,
              updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS narrative_contexts (
              context_id TEXT PRIMARY KEY,
              title TEXT NOT NULL,
              description TEXT,
              mood TEXT,
              timeline TEXT,
              created TEXT NOT NULL,
              updated TEXT NOT NULL
            );
            "#,
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
            params!["schema_version", SCHEMA_VERSION],
        )?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM meta WHERE key = 'schema_version'")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(table: &'static str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| OverlayError::InvalidRow {
            table,
            reason: format!("bad timestamp '{raw}': {err}"),
        })
}

pub(crate) fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
