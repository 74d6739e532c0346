//! Atomic JSON persistence for pipeline state.
//!
//! One document per story at `state/<story_id>.json`, written with stable
//! 2-space formatting for diffability. Writes go through a temp file and
//! rename so a reader never observes a partially written document.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::errors::PipelineError;
use crate::pipeline::state::PipelineState;

pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn path_for(&self, story_id: &str) -> PathBuf {
        self.state_dir.join(format!("{story_id}.json"))
    }

    /// Load the persisted state for a story.
    ///
    /// Missing and corrupt files both read as `None`: a corrupt document is
    /// logged and treated as "not found" rather than crashing the command.
    pub fn load(&self, story_id: &str) -> Result<Option<PipelineState>, PipelineError> {
        let path = self.path_for(story_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|source| {
            PipelineError::StateReadFailed {
                path: path.clone(),
                source,
            }
        })?;
        match serde_json::from_str::<PipelineState>(&content) {
            Ok(state) => Ok(Some(state)),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "state file is not valid JSON; treating as not found"
                );
                Ok(None)
            }
        }
    }

    /// Persist state atomically: serialize, write to `<path>.tmp`, rename.
    pub fn save(&self, state: &PipelineState) -> Result<(), PipelineError> {
        fs::create_dir_all(&self.state_dir).map_err(|source| {
            PipelineError::StateWriteFailed {
                path: self.state_dir.clone(),
                source,
            }
        })?;
        let path = self.path_for(&state.story_id);
        let json = serde_json::to_string_pretty(state).map_err(|err| {
            PipelineError::Other(anyhow::anyhow!("Failed to serialize pipeline state: {err}"))
        })?;
        write_atomic(&path, &json).map_err(|source| PipelineError::StateWriteFailed {
            path: path.clone(),
            source,
        })
    }

    /// Remove a story's state file (explicit fresh start).
    pub fn remove(&self, story_id: &str) -> Result<(), PipelineError> {
        let path = self.path_for(story_id);
        if path.exists() {
            fs::remove_file(&path).map_err(|source| PipelineError::StateWriteFailed {
                path,
                source,
            })?;
        }
        Ok(())
    }

    pub fn exists(&self, story_id: &str) -> bool {
        self.path_for(story_id).exists()
    }
}

/// Write-to-temp-then-rename so the destination is always valid JSON.
pub fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::{PipelineStatus, StageStatus};
    use tempfile::tempdir;

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut state = PipelineState::new("STORY-7", &[1, 2, 3]);
        state.stage_mut(1).status = StageStatus::Completed;
        state.set_status(PipelineStatus::InProgress);
        store.save(&state).unwrap();

        let loaded = store.load("STORY-7").unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.load("NOPE").unwrap().is_none());
    }

    #[test]
    fn load_corrupt_returns_none_instead_of_crashing() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        std::fs::write(store.path_for("BAD"), "{not json").unwrap();
        assert!(store.load("BAD").unwrap().is_none());
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let state = PipelineState::new("S", &[1]);
        store.save(&state).unwrap();
        assert!(store.path_for("S").exists());
        assert!(!store.path_for("S").with_extension("json.tmp").exists());
    }

    #[test]
    fn saved_document_is_pretty_printed() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.save(&PipelineState::new("S", &[1])).unwrap();
        let content = std::fs::read_to_string(store.path_for("S")).unwrap();
        assert!(content.contains("\n  \"story_id\""));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.save(&PipelineState::new("S", &[1])).unwrap();
        store.remove("S").unwrap();
        assert!(!store.exists("S"));
        store.remove("S").unwrap();
    }
}
