//! Runtime configuration: resolved filesystem layout under `.epicflow/`.
//!
//! Everything the orchestrator persists lives under a single `.epicflow`
//! directory inside the project:
//!
//! ```text
//! .epicflow/
//!   epicflow.toml        settings (see `settings`)
//!   stages.json          optional stage catalog override
//!   session.json         latest session artifact
//!   state/<story>.json   pipeline state, one file per story
//!   locks/               lock records plus the .guard file
//!   snapshots/           pipeline snapshots; index.json is reserved
//!   archive/             archived stale sessions
//!   logs/                stage executor output logs
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Directory name of the orchestrator's working area inside a project.
pub const EPICFLOW_DIR: &str = ".epicflow";

/// Resolved paths plus CLI-level flags.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the project directory
    pub project_dir: PathBuf,
    /// Path to the .epicflow directory
    pub epic_dir: PathBuf,
    /// CLI override: verbose mode
    pub verbose: bool,
}

impl Config {
    /// Create a Config rooted at a project directory.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let epic_dir = project_dir.join(EPICFLOW_DIR);
        Ok(Self {
            project_dir,
            epic_dir,
            verbose: false,
        })
    }

    /// Create a Config with CLI overrides applied.
    pub fn with_cli_args(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        Ok(config)
    }

    /// Get path to the settings file.
    pub fn config_file(&self) -> PathBuf {
        self.epic_dir.join("epicflow.toml")
    }

    /// Get path to the stage catalog override.
    pub fn stages_file(&self) -> PathBuf {
        self.epic_dir.join("stages.json")
    }

    /// Get path to the per-story state directory.
    pub fn state_dir(&self) -> PathBuf {
        self.epic_dir.join("state")
    }

    /// Get path to the lock directory.
    pub fn locks_dir(&self) -> PathBuf {
        self.epic_dir.join("locks")
    }

    /// Get path to the session artifact.
    pub fn session_file(&self) -> PathBuf {
        self.epic_dir.join("session.json")
    }

    /// Get path to the snapshot directory.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.epic_dir.join("snapshots")
    }

    /// Get path to the archive directory for stale sessions.
    pub fn archive_dir(&self) -> PathBuf {
        self.epic_dir.join("archive")
    }

    /// Get path to the executor log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.epic_dir.join("logs")
    }

    /// Create every directory the orchestrator writes into.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.epic_dir.clone(),
            self.state_dir(),
            self.locks_dir(),
            self.snapshots_dir(),
            self.archive_dir(),
            self.log_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}
