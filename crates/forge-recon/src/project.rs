//! Project handle tying one source store to one overlay ledger, plus the
//! registry that discovers projects under a data directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use forge_overlay_core::{HistoryRow, OverlayError};
use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::config::{ProjectsConfig, ReconConfig};
use crate::diff::{diff_attributes, EntityDiff, TextChange};
use crate::drift::{classify, detect, Classification, DriftOptions, DriftReport, DriftStatus};
use crate::error::{ReconError, Result};
use crate::hash::ContentHash;
use crate::ledger::Ledger;
use crate::source::{SourceSnapshot, SourceStore, SqliteSource};

pub const MANIFEST_FILE: &str = "project.toml";

/// Explicit handle passed to every reconciliation operation. Cloning is
/// cheap; clones share the source accessor.
#[derive(Clone)]
pub struct Project {
    name: String,
    source: Arc<dyn SourceStore>,
    ledger: Ledger,
    drift: DriftOptions,
    projects: ProjectsConfig,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("source", &self.source.location())
            .field("ledger", &self.ledger.path())
            .field("drift", &self.drift)
            .finish()
    }
}

impl Project {
    /// Opens the project stored in `dir`: the source read-only, the overlay
    /// ledger read-write (created on first use).
    pub fn open(dir: &Path, config: &ReconConfig) -> Result<Self> {
        config.validate()?;
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        let source = SqliteSource::open(dir.join(&config.source.file), &config.source.table)?;
        let ledger = Ledger::open(dir.join(&config.overlay.file), config.busy_timeout())?;
        tracing::info!(project = %name, path = %dir.display(), "project opened");
        Ok(Self::from_parts(name, Arc::new(source), ledger, config))
    }

    pub fn from_parts(
        name: impl Into<String>,
        source: Arc<dyn SourceStore>,
        ledger: Ledger,
        config: &ReconConfig,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            ledger,
            drift: config.drift_options(),
            projects: config.projects.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &dyn SourceStore {
        self.source.as_ref()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn drift_options(&self) -> DriftOptions {
        self.drift
    }

    pub(crate) fn projects_config(&self) -> &ProjectsConfig {
        &self.projects
    }

    pub fn snapshot(&self) -> Result<SourceSnapshot> {
        SourceSnapshot::capture(self.source.as_ref())
    }

    /// Full scan of the source classified against the current ledger.
    pub fn list_drift(&self) -> Result<DriftReport> {
        let snapshot = self.snapshot()?;
        let view = self.ledger.view()?;
        Ok(detect(&snapshot, &view, self.drift))
    }

    /// Old-versus-new comparison for one entity. Old content is the history
    /// snapshot recorded with the ledger's current hash.
    pub fn get_diff(&self, entity_id: &str) -> Result<EntityDiff> {
        let current = self
            .source
            .get(entity_id)?
            .map(|row| row.parse())
            .transpose()?;
        let record = self.ledger.record(entity_id)?;
        if current.is_none() && record.is_none() {
            return Err(ReconError::UnknownEntity(entity_id.to_string()));
        }

        let previous = match &record {
            Some(record) => Some(self.reviewed_snapshot(entity_id, &record.last_accepted_hash)?),
            None => None,
        };
        let classification = classify(current.as_ref().map(|e| &e.hash), record.as_ref());
        let status = match classification {
            Classification::New => Some(DriftStatus::New),
            Classification::Changed => Some(DriftStatus::Changed),
            Classification::Removed => Some(DriftStatus::Removed),
            Classification::UnchangedDeferred if self.drift.resurface_deferred => {
                Some(DriftStatus::Deferred)
            }
            _ => None,
        };

        let empty = Map::new();
        let old_attrs = previous
            .as_ref()
            .and_then(|h| h.attributes.as_object())
            .unwrap_or(&empty);
        let new_attrs = current.as_ref().map(|e| &e.attributes).unwrap_or(&empty);
        let deltas = match classification {
            Classification::New | Classification::Changed | Classification::Removed => {
                diff_attributes(old_attrs, new_attrs)
            }
            _ => Vec::new(),
        };
        let (kind_change, label_change) = match (&previous, &current) {
            (Some(old), Some(new)) if classification == Classification::Changed => (
                TextChange::between(Some(old.kind.as_str()), Some(new.kind.as_str())),
                TextChange::between(Some(old.label.as_str()), Some(new.label.as_str())),
            ),
            _ => (None, None),
        };

        let (kind, label) = match (&current, &record) {
            (Some(e), _) => (e.kind.clone(), e.label.clone()),
            (None, Some(r)) => (r.kind.clone(), r.label.clone()),
            (None, None) => (String::new(), String::new()),
        };
        Ok(EntityDiff {
            entity_id: entity_id.to_string(),
            status,
            kind,
            label,
            previous_hash: record.as_ref().map(|r| r.last_accepted_hash.clone()),
            current_hash: current.map(|e| e.hash),
            ledger_revision: record.as_ref().map(|r| r.revision).unwrap_or(0),
            kind_change,
            label_change,
            deltas,
        })
    }

    /// Adjudication history for one entity, newest first.
    pub fn history(&self, entity_id: &str, limit: Option<usize>) -> Result<Vec<HistoryRow>> {
        self.ledger.history(entity_id, limit)
    }

    fn reviewed_snapshot(&self, entity_id: &str, hash: &ContentHash) -> Result<HistoryRow> {
        self.ledger
            .history_entry_for_hash(entity_id, hash)?
            .ok_or_else(|| {
                ReconError::LedgerUnavailable(OverlayError::InvalidRow {
                    table: "adjudication_history",
                    reason: format!("no entry for {entity_id} with hash {}", hash.short()),
                })
            })
    }
}

/// Optional `project.toml` describing a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectManifest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProjectInfo {
    pub name: String,
    pub path: PathBuf,
    pub has_source: bool,
    pub has_overlay: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ProjectManifest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
}

impl ProjectInfo {
    /// A project needs at least its source store.
    pub fn is_valid(&self) -> bool {
        self.has_source
    }
}

/// Discovers projects: every subdirectory of `data_dir` holding a source
/// store file.
#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    config: ReconConfig,
}

impl ProjectRegistry {
    pub fn new(config: ReconConfig) -> Self {
        Self { config }
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.projects.data_dir
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    /// Valid projects sorted by name. A missing data directory is empty.
    pub fn list(&self) -> Result<Vec<ProjectInfo>> {
        let dir = self.data_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let info = self.describe(&entry.path());
            if info.is_valid() {
                out.push(info);
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    pub fn inspect(&self, name: &str) -> Result<ProjectInfo> {
        let path = self.project_dir(name)?;
        Ok(self.describe(&path))
    }

    pub fn open(&self, name: &str) -> Result<Project> {
        let path = self.project_dir(name)?;
        Project::open(&path, &self.config)
    }

    fn project_dir(&self, name: &str) -> Result<PathBuf> {
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\']);
        let path = self.data_dir().join(name);
        if invalid || !path.is_dir() {
            return Err(ReconError::UnknownProject(name.to_string()));
        }
        Ok(path)
    }

    fn describe(&self, path: &Path) -> ProjectInfo {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let source_path = path.join(&self.config.source.file);
        let has_source = source_path.is_file();
        let (entity_count, source_error) = if has_source {
            match SqliteSource::open(&source_path, &self.config.source.table)
                .and_then(|s| s.count())
            {
                Ok(n) => (Some(n), None),
                Err(err) => (None, Some(err.to_string())),
            }
        } else {
            (None, None)
        };
        ProjectInfo {
            manifest: read_manifest(&path.join(MANIFEST_FILE)),
            has_overlay: path.join(&self.config.overlay.file).is_file(),
            name,
            path: path.to_path_buf(),
            has_source,
            entity_count,
            source_error,
        }
    }
}

fn read_manifest(path: &Path) -> Option<ProjectManifest> {
    let text = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<ProjectManifest>(&text) {
        Ok(manifest) => Some(manifest),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "ignoring unreadable project manifest");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn seed_project(root: &Path, name: &str, with_overlay: bool) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let conn = Connection::open(dir.join("intel.sqlite")).unwrap();
        conn.execute_batch(
            "CREATE TABLE entities (id TEXT PRIMARY KEY, type TEXT, label TEXT, attributes_json TEXT);
             INSERT INTO entities VALUES ('E1','PERSON','Dr. Smith','{}');
             INSERT INTO entities VALUES ('E2','LOCATION','Lab7','{}');",
        )
        .unwrap();
        if with_overlay {
            std::fs::write(dir.join(MANIFEST_FILE), "name = \"Alpha\"\ndescription = \"demo\"\n")
                .unwrap();
            Ledger::open(dir.join("world.sqlite"), std::time::Duration::from_millis(100)).unwrap();
        }
        dir
    }

    fn registry(root: &Path) -> ProjectRegistry {
        let mut config = ReconConfig::default();
        config.projects.data_dir = root.to_path_buf();
        ProjectRegistry::new(config)
    }

    #[test]
    fn list_skips_directories_without_source() {
        let root = tempfile::tempdir().unwrap();
        seed_project(root.path(), "beta", false);
        seed_project(root.path(), "alpha", true);
        std::fs::create_dir_all(root.path().join("empty")).unwrap();
        std::fs::write(root.path().join("stray.txt"), "x").unwrap();

        let projects = registry(root.path()).list().unwrap();
        let names: Vec<&str> = projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(projects[0].entity_count, Some(2));
        assert!(projects[0].has_overlay);
        assert_eq!(
            projects[0].manifest.as_ref().and_then(|m| m.name.as_deref()),
            Some("Alpha")
        );
        assert!(!projects[1].has_overlay);
        assert!(projects[1].manifest.is_none());
    }

    #[test]
    fn missing_data_dir_lists_nothing() {
        let root = tempfile::tempdir().unwrap();
        assert!(registry(&root.path().join("absent")).list().unwrap().is_empty());
    }

    #[test]
    fn open_rejects_unknown_and_traversal_names() {
        let root = tempfile::tempdir().unwrap();
        seed_project(root.path(), "alpha", false);
        let reg = registry(root.path());
        assert!(matches!(reg.open("nope"), Err(ReconError::UnknownProject(_))));
        assert!(matches!(reg.open("../alpha"), Err(ReconError::UnknownProject(_))));
        let project = reg.open("alpha").unwrap();
        assert_eq!(project.name(), "alpha");
        assert_eq!(project.list_drift().unwrap().summary.new, 2);
        assert!(reg.inspect("alpha").unwrap().has_overlay);
    }
}
