//! Stale resource reclamation.
//!
//! Three independent sweeps run before a pipeline takes its lock:
//! 1. orphan story locks (delegated to [`LockCoordinator::reclaim_stale`])
//! 2. the stale session artifact, archived rather than deleted
//! 3. stale snapshots, deleted with an audit record written first
//!
//! A failure inside one sweep is recorded in the summary and never aborts
//! the others: reclamation is best-effort hygiene, not a precondition.

use chrono::{DateTime, Duration, Utc};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::Config;
use crate::lock::LockCoordinator;
use crate::pipeline::store::write_atomic;
use crate::settings::LifecycleSection;

/// Reserved audit file inside the snapshot directory; never a snapshot.
const SNAPSHOT_INDEX: &str = "index.json";

/// What one reclamation pass accomplished.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReclaimSummary {
    pub locks_removed: usize,
    pub sessions_archived: usize,
    pub snapshots_removed: usize,
    /// Human-readable failures from individual sweeps.
    pub errors: Vec<String>,
}

/// Audit record for one deleted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub filename: String,
    pub removed_at: DateTime<Utc>,
    pub original_created_at: DateTime<Utc>,
    pub age_days: i64,
    /// Story ids referenced by the snapshot, or `["unknown"]` when the
    /// snapshot body could not be parsed.
    pub associated_ids: Vec<String>,
}

/// Append-only audit log of deleted snapshots, kept at
/// `snapshots/index.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotIndex {
    pub last_cleanup: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entries: Vec<SnapshotRecord>,
}

impl SnapshotIndex {
    /// Load the index, starting fresh when it is missing or corrupt. Audit
    /// history is advisory, so a corrupt index never blocks reclamation.
    fn load_or_fresh(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(index) => index,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "snapshot index corrupt, starting fresh");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        write_atomic(path, &json)
    }
}

/// Runs the reclamation sweeps for one `.epicflow` directory.
pub struct LifecycleReclaimer {
    config: Config,
    lifecycle: LifecycleSection,
    coordinator: LockCoordinator,
}

impl LifecycleReclaimer {
    pub fn new(config: Config, lifecycle: LifecycleSection) -> Self {
        let coordinator = LockCoordinator::new(config.locks_dir());
        Self {
            config,
            lifecycle,
            coordinator,
        }
    }

    /// Replace the lock coordinator (tests inject a fake liveness probe).
    pub fn with_coordinator(mut self, coordinator: LockCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Run all three sweeps and report what happened.
    pub fn reclaim(&self) -> ReclaimSummary {
        let mut summary = ReclaimSummary::default();

        match self.coordinator.reclaim_stale() {
            Ok(removed) => summary.locks_removed = removed,
            Err(err) => summary.errors.push(format!("lock sweep failed: {err}")),
        }

        if let Err(err) = self.sweep_session(&mut summary) {
            summary.errors.push(format!("session sweep failed: {err}"));
        }

        if let Err(err) = self.sweep_snapshots(&mut summary) {
            summary.errors.push(format!("snapshot sweep failed: {err}"));
        }

        summary
    }

    /// Archive the session artifact when its own `last_updated` timestamp
    /// is older than the staleness threshold.
    fn sweep_session(&self, summary: &mut ReclaimSummary) -> anyhow::Result<()> {
        let session_file = self.config.session_file();
        if !session_file.exists() {
            return Ok(());
        }

        let content = fs::read_to_string(&session_file)?;
        let last_updated = match session_last_updated(&content) {
            Some(ts) => ts,
            None => {
                // Without a readable timestamp staleness cannot be judged,
                // so the artifact stays where it is. Not a sweep error.
                warn!(
                    path = %session_file.display(),
                    "session artifact has no parseable last_updated timestamp; skipping"
                );
                return Ok(());
            }
        };

        let threshold = Duration::days(self.lifecycle.session_stale_days as i64);
        if Utc::now() - last_updated <= threshold {
            return Ok(());
        }

        let archive_dir = self.config.archive_dir();
        fs::create_dir_all(&archive_dir)?;
        // The archive name comes from the artifact's own timestamp so a
        // repeated sweep of the same artifact is idempotent.
        let archived = archive_dir.join(format!(
            "session-{}.json",
            last_updated.format("%Y-%m-%dT%H-%M-%S")
        ));
        fs::rename(&session_file, &archived)?;
        debug!(to = %archived.display(), "archived stale session artifact");
        summary.sessions_archived += 1;
        Ok(())
    }

    /// Delete snapshots older than the staleness threshold, recording each
    /// in the audit index before any file is removed.
    fn sweep_snapshots(&self, summary: &mut ReclaimSummary) -> anyhow::Result<()> {
        let snapshots_dir = self.config.snapshots_dir();
        if !snapshots_dir.exists() {
            return Ok(());
        }

        let threshold = Duration::days(self.lifecycle.snapshot_stale_days as i64);
        let now = Utc::now();
        let mut doomed: Vec<(PathBuf, SnapshotRecord)> = Vec::new();

        let pattern = snapshots_dir.join("*.json");
        for entry in glob(&pattern.to_string_lossy())? {
            let path = match entry {
                Ok(path) => path,
                Err(err) => {
                    summary.errors.push(format!("snapshot listing failed: {err}"));
                    continue;
                }
            };
            if path.file_name().and_then(|n| n.to_str()) == Some(SNAPSHOT_INDEX) {
                continue;
            }

            let created_at = match file_mtime(&path) {
                Ok(ts) => ts,
                Err(err) => {
                    summary
                        .errors
                        .push(format!("cannot stat {}: {err}", path.display()));
                    continue;
                }
            };
            let age = now - created_at;
            if age <= threshold {
                continue;
            }

            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            doomed.push((
                path.clone(),
                SnapshotRecord {
                    filename,
                    removed_at: now,
                    original_created_at: created_at,
                    age_days: age.num_days(),
                    associated_ids: snapshot_story_ids(&path),
                },
            ));
        }

        if doomed.is_empty() {
            return Ok(());
        }

        // Persist the audit entries first: a crash between index write and
        // deletion leaves an over-complete audit trail, never a silent gap.
        let index_path = snapshots_dir.join(SNAPSHOT_INDEX);
        let mut index = SnapshotIndex::load_or_fresh(&index_path);
        index.last_cleanup = Some(now);
        index.entries.extend(doomed.iter().map(|(_, r)| r.clone()));
        index.save(&index_path)?;

        for (path, record) in doomed {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(file = %record.filename, age_days = record.age_days, "removed stale snapshot");
                    summary.snapshots_removed += 1;
                }
                Err(err) => summary
                    .errors
                    .push(format!("failed to remove {}: {err}", path.display())),
            }
        }
        Ok(())
    }
}

/// Extract `last_updated` from a session artifact, tolerating any shape.
fn session_last_updated(content: &str) -> Option<DateTime<Utc>> {
    let value: serde_json::Value = serde_json::from_str(content).ok()?;
    let raw = value.get("last_updated")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Story ids mentioned by a snapshot body, `["unknown"]` when unreadable.
fn snapshot_story_ids(path: &Path) -> Vec<String> {
    let parsed: Option<serde_json::Value> = fs::read_to_string(path)
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok());
    match parsed.and_then(|v| v.get("story_id").and_then(|id| id.as_str()).map(String::from)) {
        Some(id) => vec![id],
        None => vec!["unknown".to_string()],
    }
}

fn file_mtime(path: &Path) -> std::io::Result<DateTime<Utc>> {
    Ok(DateTime::<Utc>::from(fs::metadata(path)?.modified()?))
}
