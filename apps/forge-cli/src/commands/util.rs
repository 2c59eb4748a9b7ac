use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;
use forge_recon::config::CONFIG_FILE;
use forge_recon::{load_config, Project, ProjectRegistry, ReconConfig};
use serde::Serialize;

/// Global options shared by every subcommand.
pub struct Context {
    pub config_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

impl Context {
    pub fn config(&self) -> Result<ReconConfig> {
        let path = self
            .config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
        if self.config_path.is_some() && !path.exists() {
            anyhow::bail!("config file {} not found", path.display());
        }
        let mut cfg =
            load_config(&path).with_context(|| format!("loading {}", path.display()))?;
        if let Some(dir) = &self.data_dir {
            cfg.projects.data_dir = dir.clone();
        }
        tracing::debug!(data_dir = %cfg.projects.data_dir.display(), "configuration loaded");
        Ok(cfg)
    }

    pub fn registry(&self) -> Result<ProjectRegistry> {
        Ok(ProjectRegistry::new(self.config()?))
    }

    pub fn project(&self, name: &str) -> Result<Project> {
        self.registry()?
            .open(name)
            .with_context(|| format!("opening project '{name}'"))
    }
}

#[derive(Args, Clone, Copy, Default)]
pub struct OutputArgs {
    /// Emit JSON instead of a human summary
    #[arg(long)]
    pub json: bool,
    /// Pretty-print JSON (only with --json)
    #[arg(long, requires = "json")]
    pub pretty: bool,
}

pub fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}

pub fn display_path(path: &Path) -> String {
    path.display().to_string()
}

/// Compact rendering of a JSON value for table output.
pub fn short_value(value: Option<&serde_json::Value>) -> String {
    match value {
        None => "-".to_string(),
        Some(serde_json::Value::String(s)) => format!("{s:?}"),
        Some(other) => other.to_string(),
    }
}
