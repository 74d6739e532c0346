//! Advisory, filesystem-visible mutual exclusion keyed by story id.
//!
//! A lock is a first-class JSON record carrying its owner process id and a
//! TTL, so "is this lock live" is a pure function of (now, TTL, process
//! liveness) and reclamation is unit-testable without real processes. All
//! mutations of the lock directory happen under an fs2 advisory lock on a
//! guard file, which closes the check-then-act window between inspecting a
//! record and removing it.

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::errors::LockError;
use crate::pipeline::store::write_atomic;

/// Reserved guard file name; never a lock record.
const GUARD_FILE: &str = ".guard";

/// Persisted lock record. At most one live record exists per resource id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub resource_id: String,
    pub owner_pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl LockRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.acquired_at >= Duration::seconds(self.ttl_secs as i64)
    }
}

/// Pure liveness predicate: a lock is live while its TTL has not elapsed
/// and its owning process still exists.
pub fn is_live(record: &LockRecord, now: DateTime<Utc>, process_alive: bool) -> bool {
    !record.is_expired(now) && process_alive
}

/// Check whether a process exists in the host process table.
///
/// Signal 0 performs the existence check without delivering anything;
/// EPERM means the process exists but belongs to another user.
pub fn process_alive(pid: u32) -> bool {
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Injectable liveness probe (swapped for a constant in tests).
pub type LivenessProbe = fn(u32) -> bool;

/// Coordinates story locks in a single lock directory.
pub struct LockCoordinator {
    lock_dir: PathBuf,
    probe: LivenessProbe,
}

/// Held lock handle. Dropping it releases the lock best-effort; call
/// [`LockGuard::release`] to observe release errors.
#[derive(Debug)]
pub struct LockGuard {
    lock_dir: PathBuf,
    resource_id: String,
    released: bool,
}

impl LockGuard {
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        release_owned(&self.lock_dir, &self.resource_id)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = release_owned(&self.lock_dir, &self.resource_id) {
                warn!(
                    resource = %self.resource_id,
                    error = %err,
                    "failed to release story lock on drop"
                );
            }
        }
    }
}

fn lock_path(lock_dir: &std::path::Path, resource_id: &str) -> PathBuf {
    lock_dir.join(format!("{resource_id}.lock.json"))
}

fn guard_lock(lock_dir: &std::path::Path) -> Result<File, LockError> {
    fs::create_dir_all(lock_dir)?;
    let guard = File::create(lock_dir.join(GUARD_FILE))?;
    guard.lock_exclusive()?;
    Ok(guard)
}

fn read_record_at(
    lock_dir: &std::path::Path,
    resource_id: &str,
) -> Result<Option<LockRecord>, LockError> {
    let path = lock_path(lock_dir, resource_id);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    match serde_json::from_str::<LockRecord>(&content) {
        Ok(record) => Ok(Some(record)),
        Err(err) => Err(LockError::Corrupt {
            path,
            message: err.to_string(),
        }),
    }
}

/// Remove the record only when this process still owns it. If another
/// invocation reclaimed the lock after a TTL lapse, its live record is
/// left untouched.
fn release_owned(lock_dir: &std::path::Path, resource_id: &str) -> Result<(), LockError> {
    let _guard = guard_lock(lock_dir)?;
    match read_record_at(lock_dir, resource_id)? {
        None => Ok(()),
        Some(record) if record.owner_pid == std::process::id() => {
            fs::remove_file(lock_path(lock_dir, resource_id))?;
            Ok(())
        }
        Some(record) => Err(LockError::NotOwner {
            resource_id: resource_id.to_string(),
            owner_pid: record.owner_pid,
        }),
    }
}

impl LockCoordinator {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            probe: process_alive,
        }
    }

    /// Replace the process-liveness probe (tests).
    pub fn with_probe(mut self, probe: LivenessProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Take the directory-wide guard lock for the duration of a mutation.
    fn guard(&self) -> Result<File, LockError> {
        guard_lock(&self.lock_dir)
    }

    fn read_record(&self, resource_id: &str) -> Result<Option<LockRecord>, LockError> {
        read_record_at(&self.lock_dir, resource_id)
    }

    /// Acquire the lock for a story, failing fast when a live lock exists.
    ///
    /// A stale record (TTL elapsed or owner process gone) is reclaimed in
    /// place; a corrupt record is treated as stale.
    pub fn acquire(&self, resource_id: &str, ttl_secs: u64) -> Result<LockGuard, LockError> {
        let _guard = self.guard()?;
        let now = Utc::now();

        match self.read_record(resource_id) {
            Ok(Some(existing)) => {
                if is_live(&existing, now, (self.probe)(existing.owner_pid)) {
                    return Err(LockError::AlreadyHeld {
                        resource_id: resource_id.to_string(),
                        owner_pid: existing.owner_pid,
                    });
                }
                debug!(
                    resource = resource_id,
                    owner = existing.owner_pid,
                    "reclaiming stale lock during acquire"
                );
            }
            Ok(None) => {}
            Err(LockError::Corrupt { path, message }) => {
                warn!(path = %path.display(), %message, "replacing corrupt lock record");
            }
            Err(err) => return Err(err),
        }

        let record = LockRecord {
            resource_id: resource_id.to_string(),
            owner_pid: std::process::id(),
            acquired_at: now,
            ttl_secs,
        };
        let path = lock_path(&self.lock_dir, resource_id);
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        write_atomic(&path, &json)?;

        Ok(LockGuard {
            lock_dir: self.lock_dir.clone(),
            resource_id: resource_id.to_string(),
            released: false,
        })
    }

    /// Release a lock owned by this process.
    pub fn release(&self, resource_id: &str) -> Result<(), LockError> {
        release_owned(&self.lock_dir, resource_id)
    }

    /// Remove every stale lock record, returning the count removed.
    ///
    /// Liveness is re-checked immediately before each removal while the
    /// guard lock is held, so a legitimate owner's renewal cannot race the
    /// reclaim.
    pub fn reclaim_stale(&self) -> Result<usize, LockError> {
        if !self.lock_dir.exists() {
            return Ok(0);
        }
        let _guard = self.guard()?;
        let mut removed = 0;

        for entry in fs::read_dir(&self.lock_dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if name == GUARD_FILE || !name.ends_with(".lock.json") {
                continue;
            }

            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "unreadable lock record");
                    continue;
                }
            };
            match serde_json::from_str::<LockRecord>(&content) {
                Ok(record) => {
                    // Moment-of-removal check: now and the process table are
                    // both sampled here, not from an earlier snapshot.
                    if !is_live(&record, Utc::now(), (self.probe)(record.owner_pid)) {
                        fs::remove_file(&path)?;
                        debug!(
                            resource = %record.resource_id,
                            owner = record.owner_pid,
                            "reclaimed stale lock"
                        );
                        removed += 1;
                    }
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "removing corrupt lock record");
                    fs::remove_file(&path)?;
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }
}
