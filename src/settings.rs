//! Persistent settings read from `.epicflow/epicflow.toml`.
//!
//! # Configuration File Format
//!
//! ```toml
//! [pipeline]
//! max_stage_retries = 2   # required, no inferred default
//! strict = false
//!
//! [executor]
//! command = "epic-agent"
//! args = ["--json"]
//!
//! [lifecycle]
//! lock_ttl_secs = 3600
//! session_stale_days = 30
//! snapshot_stale_days = 30
//!
//! [gates.stage3_to_stage4]
//! blocking = true
//! min_score = 3.5
//! checks = ["no_critical_errors", "stage_succeeded"]
//! ```
//!
//! A `[gates.<key>]` entry replaces the built-in entry for that key as a
//! whole; omitted fields fall back to field defaults, never to the built-in
//! entry's values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::gates::config::GateConfig;

/// Pipeline execution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Revision attempts allowed per stage before a NEEDS_REVISION verdict
    /// escalates to blocked. Required: there is no sensible universal
    /// default, so an absent value is a load error rather than a guess.
    #[serde(default)]
    pub max_stage_retries: Option<u32>,
    /// When true, any gate issue at all blocks the transition.
    #[serde(default)]
    pub strict: bool,
}

/// Stage executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSection {
    /// Command invoked once per stage.
    #[serde(default = "default_executor_command")]
    pub command: String,
    /// Extra arguments passed before the stage environment takes over.
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_executor_command() -> String {
    "epic-agent".to_string()
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            command: default_executor_command(),
            args: Vec::new(),
        }
    }
}

/// Reclamation thresholds for locks, sessions and snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSection {
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    #[serde(default = "default_session_stale_days")]
    pub session_stale_days: u32,
    #[serde(default = "default_snapshot_stale_days")]
    pub snapshot_stale_days: u32,
}

fn default_lock_ttl_secs() -> u64 {
    3600
}

fn default_session_stale_days() -> u32 {
    30
}

fn default_snapshot_stale_days() -> u32 {
    30
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl_secs(),
            session_stale_days: default_session_stale_days(),
            snapshot_stale_days: default_snapshot_stale_days(),
        }
    }
}

/// The complete epicflow.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpicToml {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub lifecycle: LifecycleSection,
    /// Whole-entry gate overrides keyed by gate key.
    #[serde(default)]
    pub gates: HashMap<String, GateConfig>,
}

impl EpicToml {
    /// Load settings from a TOML file and validate required fields.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let settings = Self::parse(&content)?;
        settings.ensure_complete()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string (does not validate required fields).
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse epicflow.toml")
    }

    /// Save settings to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize epicflow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Reject configurations with required settings missing.
    pub fn ensure_complete(&self) -> Result<()> {
        if self.pipeline.max_stage_retries.is_none() {
            anyhow::bail!(
                "epicflow.toml is missing required setting 'max_stage_retries' under [pipeline]"
            );
        }
        Ok(())
    }

    /// The validated retry bound.
    pub fn max_stage_retries(&self) -> Result<u32> {
        self.pipeline
            .max_stage_retries
            .context("'max_stage_retries' is not set under [pipeline]")
    }
}
