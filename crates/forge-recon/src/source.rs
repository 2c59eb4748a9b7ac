//! Read-only access to the upstream source store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::config::is_sql_identifier;
use crate::error::{ReconError, Result};
use crate::model::SourceEntity;

/// Read side of the upstream dataset. Implementations never expose a write
/// path; reconciliation only needs point lookups and full scans.
pub trait SourceStore: Send + Sync {
    /// Human-readable location used in errors and logs.
    fn location(&self) -> String;

    fn get(&self, id: &str) -> Result<Option<SourceEntity>>;

    fn scan(&self) -> Result<Vec<SourceEntity>>;

    fn count(&self) -> Result<u64> {
        Ok(self.scan()?.len() as u64)
    }
}

/// SQLite-backed source opened with `SQLITE_OPEN_READ_ONLY` and
/// `query_only`, one short-lived connection per call.
#[derive(Debug, Clone)]
pub struct SqliteSource {
    db_path: PathBuf,
    table: String,
}

impl SqliteSource {
    pub fn open(db_path: impl AsRef<Path>, table: &str) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let location = db_path.display().to_string();
        if !is_sql_identifier(table) {
            return Err(ReconError::Config(format!(
                "source table '{table}' is not a plain SQL identifier"
            )));
        }
        if !db_path.is_file() {
            return Err(ReconError::source_unavailable(
                location,
                "file not found; run the extractor first",
            ));
        }
        let source = Self {
            db_path,
            table: table.to_string(),
        };
        // Fail early when the file is not a database or lacks the table.
        let conn = source.conn()?;
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {} LIMIT 1", source.table),
            [],
            |row| row.get::<_, i64>(0),
        )
        .map_err(|err| ReconError::source_unavailable(source.location(), err))?;
        tracing::debug!(path = %source.db_path.display(), table, "source store attached read-only");
        Ok(source)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(&self.db_path, flags)
            .map_err(|err| ReconError::source_unavailable(self.location(), err))?;
        conn.pragma_update(None, "query_only", true)
            .map_err(|err| ReconError::source_unavailable(self.location(), err))?;
        Ok(conn)
    }

    fn select_sql(&self) -> String {
        format!(
            "SELECT CAST(id AS TEXT), type, label, attributes_json FROM {}",
            self.table
        )
    }
}

/// Text view of a loosely typed column; numbers are rendered as written.
fn text_value(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Decodes one row column by column so a single bad value only marks that
/// entity malformed. Rows without an id are skipped.
fn read_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<SourceEntity>> {
    let Some(id) = text_value(row.get_ref(0)?) else {
        tracing::warn!("skipping source row without an id");
        return Ok(None);
    };
    let kind = text_value(row.get_ref(1)?).unwrap_or_default();
    let label = text_value(row.get_ref(2)?).unwrap_or_default();
    let (attributes_json, undecodable) = match row.get_ref(3)? {
        ValueRef::Null => (None, None),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => (Some(text.to_string()), None),
            Err(err) => (None, Some(format!("attributes are not valid UTF-8: {err}"))),
        },
        ValueRef::Blob(_) => (None, Some("attributes stored as a BLOB".to_string())),
        number => (text_value(number), None),
    };
    Ok(Some(SourceEntity {
        id,
        kind,
        label,
        attributes_json,
        undecodable,
    }))
}

impl SourceStore for SqliteSource {
    fn location(&self) -> String {
        self.db_path.display().to_string()
    }

    fn get(&self, id: &str) -> Result<Option<SourceEntity>> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE CAST(id AS TEXT) = ?1 LIMIT 1", self.select_sql());
        conn.query_row(&sql, params![id], read_entity)
            .optional()
            .map(Option::flatten)
            .map_err(|err| ReconError::source_unavailable(self.location(), err))
    }

    fn scan(&self) -> Result<Vec<SourceEntity>> {
        let conn = self.conn()?;
        let sql = format!("{} ORDER BY CAST(id AS TEXT) ASC", self.select_sql());
        let unavailable = |err: rusqlite::Error| ReconError::source_unavailable(self.location(), err);
        let mut stmt = conn.prepare(&sql).map_err(unavailable)?;
        let rows = stmt.query_map([], read_entity).map_err(unavailable)?;
        let mut out = Vec::new();
        for row in rows {
            if let Some(entity) = row.map_err(unavailable)? {
                out.push(entity);
            }
        }
        Ok(out)
    }

    fn count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let n: i64 = conn
            .query_row(&format!("SELECT COUNT(id) FROM {}", self.table), [], |row| {
                row.get(0)
            })
            .map_err(|err| ReconError::source_unavailable(self.location(), err))?;
        Ok(n.max(0) as u64)
    }
}

/// In-memory source whose contents can be swapped wholesale, standing in for
/// a regenerated upstream dataset.
#[derive(Debug, Default)]
pub struct StaticSource {
    entities: RwLock<BTreeMap<String, SourceEntity>>,
}

impl StaticSource {
    pub fn new(entities: impl IntoIterator<Item = SourceEntity>) -> Self {
        let source = Self::default();
        source.replace(entities);
        source
    }

    /// Replaces every entity, as an upstream regeneration would.
    pub fn replace(&self, entities: impl IntoIterator<Item = SourceEntity>) {
        let map: BTreeMap<String, SourceEntity> =
            entities.into_iter().map(|e| (e.id.clone(), e)).collect();
        match self.entities.write() {
            Ok(mut guard) => *guard = map,
            Err(poisoned) => *poisoned.into_inner() = map,
        }
    }
}

impl SourceStore for StaticSource {
    fn location(&self) -> String {
        "memory".to_string()
    }

    fn get(&self, id: &str) -> Result<Option<SourceEntity>> {
        let guard = self
            .entities
            .read()
            .map_err(|_| ReconError::source_unavailable("memory", "lock poisoned"))?;
        Ok(guard.get(id).cloned())
    }

    fn scan(&self) -> Result<Vec<SourceEntity>> {
        let guard = self
            .entities
            .read()
            .map_err(|_| ReconError::source_unavailable("memory", "lock poisoned"))?;
        Ok(guard.values().cloned().collect())
    }
}

/// Point-in-time copy of the source, keyed by entity id.
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    entities: BTreeMap<String, SourceEntity>,
}

impl SourceSnapshot {
    pub fn capture(store: &dyn SourceStore) -> Result<Self> {
        let rows = store.scan()?;
        let snapshot = Self::from_entities(rows);
        tracing::debug!(
            location = %store.location(),
            entities = snapshot.len(),
            "source snapshot captured"
        );
        Ok(snapshot)
    }

    /// Builds a snapshot; when an id repeats, the first row wins.
    pub fn from_entities(rows: impl IntoIterator<Item = SourceEntity>) -> Self {
        let mut entities = BTreeMap::new();
        for row in rows {
            if entities.contains_key(&row.id) {
                tracing::warn!(entity_id = %row.id, "duplicate entity id in source; keeping first row");
                continue;
            }
            entities.insert(row.id.clone(), row);
        }
        Self { entities }
    }

    pub fn get(&self, id: &str) -> Option<&SourceEntity> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceEntity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seed_source(dir: &Path) -> PathBuf {
        let path = dir.join("intel.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE entities (id TEXT PRIMARY KEY, type TEXT, label TEXT, attributes_json TEXT);
             INSERT INTO entities VALUES ('E2','location','Lab7','{\"city\":\"Basel\"}');
             INSERT INTO entities VALUES ('E1','person','Dr. Smith','{\"role\":\"scientist\"}');
             INSERT INTO entities VALUES ('E3','person',NULL,NULL);",
        )
        .unwrap();
        path
    }

    #[test]
    fn sqlite_source_scans_and_gets() {
        let dir = tempfile::tempdir().unwrap();
        let source = SqliteSource::open(seed_source(dir.path()), "entities").unwrap();
        let rows = source.scan().unwrap();
        assert_eq!(
            rows.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["E1", "E2", "E3"]
        );
        assert_eq!(source.count().unwrap(), 3);
        let e1 = source.get("E1").unwrap().unwrap();
        assert_eq!(e1.kind, "person");
        assert_eq!(e1.parse().unwrap().attributes["role"], json!("scientist"));
        let e3 = source.get("E3").unwrap().unwrap();
        assert_eq!(e3.label, "");
        assert!(e3.attributes_json.is_none());
        assert!(source.get("missing").unwrap().is_none());
    }

    #[test]
    fn loosely_typed_rows_decode_one_by_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loose.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE loose (id, type, label, attributes_json);
             INSERT INTO loose VALUES ('E1','person','Dr. Smith','{\"role\":\"scientist\"}');
             INSERT INTO loose VALUES ('E2','event',1999,'{}');
             INSERT INTO loose VALUES ('E3','person','Blob',X'7B7D');
             INSERT INTO loose VALUES ('E4','person','Bytes',CAST(X'7BFF7D' AS TEXT));
             INSERT INTO loose VALUES (NULL,'person','Nobody','{}');
             INSERT INTO loose VALUES (7,'place',2.5,NULL);",
        )
        .unwrap();
        drop(conn);

        let source = SqliteSource::open(&path, "loose").unwrap();
        let rows = source.scan().unwrap();
        assert_eq!(
            rows.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["7", "E1", "E2", "E3", "E4"]
        );
        assert!(rows[1].parse().is_ok());

        let e2 = source.get("E2").unwrap().unwrap();
        assert_eq!(e2.label, "1999");
        assert!(e2.parse().is_ok());
        assert_eq!(source.get("7").unwrap().unwrap().label, "2.5");

        for id in ["E3", "E4"] {
            let row = source.get(id).unwrap().unwrap();
            assert!(row.undecodable.is_some());
            assert!(matches!(
                row.parse().unwrap_err(),
                ReconError::MalformedAttributes { .. }
            ));
        }
    }

    #[test]
    fn sqlite_source_cannot_write() {
        let dir = tempfile::tempdir().unwrap();
        let source = SqliteSource::open(seed_source(dir.path()), "entities").unwrap();
        let conn = source.conn().unwrap();
        let err = conn.execute("DELETE FROM entities", []);
        assert!(err.is_err());
        assert_eq!(source.count().unwrap(), 3);
    }

    #[test]
    fn missing_file_or_table_is_source_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = SqliteSource::open(dir.path().join("nope.sqlite"), "entities").unwrap_err();
        assert!(matches!(err, ReconError::SourceUnavailable { .. }));

        let path = seed_source(dir.path());
        let err = SqliteSource::open(&path, "relationships").unwrap_err();
        assert!(matches!(err, ReconError::SourceUnavailable { .. }));

        let err = SqliteSource::open(&path, "entities; DROP TABLE x").unwrap_err();
        assert!(matches!(err, ReconError::Config(_)));
    }

    #[test]
    fn static_source_replace_regenerates() {
        let source = StaticSource::new([SourceEntity::new("A", "person", "Ann", json!({}))]);
        assert_eq!(source.count().unwrap(), 1);
        source.replace([
            SourceEntity::new("B", "person", "Bob", json!({})),
            SourceEntity::new("C", "person", "Cy", json!({})),
        ]);
        assert!(source.get("A").unwrap().is_none());
        assert_eq!(source.scan().unwrap().len(), 2);
    }

    #[test]
    fn snapshot_keeps_first_duplicate() {
        let snapshot = SourceSnapshot::from_entities([
            SourceEntity::new("A", "person", "first", json!({})),
            SourceEntity::new("A", "person", "second", json!({})),
        ]);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("A").unwrap().label, "first");
    }
}
