//! One-shot, read-only environment probe.
//!
//! The result is cached on the pipeline state when the story is first
//! started and never re-probed mid-run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Cached environment context for a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectProfile {
    /// Well-known build manifests found in the project root.
    pub detected: Vec<String>,
    pub probed_at: DateTime<Utc>,
}

/// Manifest filenames checked by the probe, in a stable order.
const MANIFESTS: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "go.mod",
    "pom.xml",
    "Makefile",
];

/// Probe the project directory for well-known build manifests.
///
/// Read-only: only existence checks, no file contents are read.
pub fn probe(project_dir: &Path) -> ProjectProfile {
    let detected = MANIFESTS
        .iter()
        .filter(|name| project_dir.join(name).exists())
        .map(|name| name.to_string())
        .collect();
    ProjectProfile {
        detected,
        probed_at: Utc::now(),
    }
}
