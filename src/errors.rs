//! Typed error hierarchy for the epicflow orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `PipelineError` — state machine and command-level failures
//! - `LockError` — story lock acquisition and reclamation failures
//! - `GateError` — internal gate evaluation failures (absorbed by the
//!   evaluator and converted into BLOCKED results, never propagated)

use thiserror::Error;

/// Errors from the pipeline state machine and command layer.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No pipeline state found for story '{story_id}'")]
    StateNotFound { story_id: String },

    #[error("Pipeline for story '{story_id}' is already complete")]
    AlreadyComplete { story_id: String },

    #[error("Failed to read state file at {path}: {source}")]
    StateReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write state file at {path}: {source}")]
    StateWriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file at {path} is not valid JSON: {source}")]
    StateCorrupt {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown stage {stage} (not in the stage catalog)")]
    UnknownStage { stage: u32 },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the story lock coordinator.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Story '{resource_id}' is locked by process {owner_pid}")]
    AlreadyHeld { resource_id: String, owner_pid: u32 },

    #[error("Lock for '{resource_id}' is owned by process {owner_pid}, not this process")]
    NotOwner { resource_id: String, owner_pid: u32 },

    #[error("Lock record at {path} is unreadable: {message}")]
    Corrupt {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("Lock I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Internal gate evaluation failures.
///
/// These never escape `GateEvaluator::evaluate` — they are converted to a
/// BLOCKED result carrying a critical `gate_evaluation` issue.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Stage result is malformed: {0}")]
    MalformedResult(String),

    #[error("Gate configuration for '{gate_key}' is invalid: {message}")]
    InvalidConfig { gate_key: String, message: String },
}
