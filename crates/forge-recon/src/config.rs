use std::path::{Path, PathBuf};
use std::time::Duration;

use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::drift::DriftOptions;
use crate::error::{ReconError, Result};

pub const CONFIG_FILE: &str = "forge.toml";
pub const ENV_BUSY_MS: &str = "FORGE_SQLITE_BUSY_MS";
pub const ENV_DATA_DIR: &str = "FORGE_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct SourceConfig {
    /// Source database file name inside a project directory.
    pub file: String,
    /// Table holding `id`, `type`, `label` and `attributes_json`.
    pub table: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            file: "intel.sqlite".into(),
            table: "entities".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct OverlayConfig {
    /// Overlay database file name inside a project directory.
    pub file: String,
    /// How long a writer waits on a locked ledger before failing.
    pub busy_timeout_ms: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            file: "world.sqlite".into(),
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct DriftConfig {
    /// Report deferred entities again even when their content is unchanged.
    pub resurface_deferred: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct ProjectsConfig {
    /// Directory whose subdirectories are projects.
    pub data_dir: PathBuf,
    /// Entity kinds that may be promoted to personas.
    pub promotable_kinds: Vec<String>,
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/projects"),
            promotable_kinds: ["PERSON", "ORGANIZATION", "CHARACTER", "ENTITY"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl ProjectsConfig {
    pub fn is_promotable(&self, kind: &str) -> bool {
        self.promotable_kinds
            .iter()
            .any(|k| k.eq_ignore_ascii_case(kind.trim()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct ReconConfig {
    pub source: SourceConfig,
    pub overlay: OverlayConfig,
    pub drift: DriftConfig,
    pub projects: ProjectsConfig,
}

impl ReconConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.overlay.busy_timeout_ms)
    }

    pub fn drift_options(&self) -> DriftOptions {
        DriftOptions {
            resurface_deferred: self.drift.resurface_deferred,
        }
    }

    /// Applies `FORGE_SQLITE_BUSY_MS` and `FORGE_DATA_DIR` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Some(ms) = std::env::var(ENV_BUSY_MS)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
        {
            self.overlay.busy_timeout_ms = ms;
        }
        if let Some(dir) = std::env::var_os(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.projects.data_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !is_sql_identifier(&self.source.table) {
            return Err(ReconError::Config(format!(
                "source.table '{}' must be a plain SQL identifier",
                self.source.table
            )));
        }
        for (key, value) in [("source.file", &self.source.file), ("overlay.file", &self.overlay.file)] {
            if value.trim().is_empty() {
                return Err(ReconError::Config(format!("{key} must not be empty")));
            }
        }
        if self.source.file == self.overlay.file {
            return Err(ReconError::Config(
                "source.file and overlay.file must differ".into(),
            ));
        }
        Ok(())
    }
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(ReconConfig);
    let schema_value = serde_json::to_value(&schema).expect("schema value");
    validator_for(&schema_value).expect("valid schema")
});

/// Returns the JSON schema describing `forge.toml`.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(ReconConfig);
    serde_json::to_value(&schema).expect("schema json")
}

/// Parses and validates TOML text without applying environment overrides.
pub fn parse_config(content: &str) -> Result<ReconConfig> {
    let raw: toml::Value =
        toml::from_str(content).map_err(|err| ReconError::Config(err.to_string()))?;
    let json_value =
        serde_json::to_value(&raw).map_err(|err| ReconError::Config(err.to_string()))?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(ReconError::Config(validation_errors.join("; ")));
    }
    let cfg: ReconConfig =
        serde_json::from_value(json_value).map_err(|err| ReconError::Config(err.to_string()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Loads `path`, falling back to defaults when the file does not exist, then
/// applies environment overrides.
pub fn load_config(path: &Path) -> Result<ReconConfig> {
    let mut cfg = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        parse_config(&content)?
    } else {
        tracing::debug!(path = %path.display(), "config file absent; using defaults");
        ReconConfig::default()
    };
    cfg.apply_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}

pub(crate) fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
