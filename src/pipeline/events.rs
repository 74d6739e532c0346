//! Transition events emitted by the pipeline machine.
//!
//! These events are the sole coupling surface to presentation code: the
//! machine reports them through an injected observer and in the returned
//! run report, without depending on any notification mechanism.

use crate::gates::GateResult;
use crate::pipeline::state::PipelineStatus;

/// One observable pipeline transition.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StageStarted {
        stage: u32,
        name: String,
    },
    StageCompleted {
        stage: u32,
        name: String,
        gate: GateResult,
    },
    StageRetry {
        stage: u32,
        retries: u32,
        max_retries: u32,
    },
    StatusChanged {
        from: PipelineStatus,
        to: PipelineStatus,
    },
}

/// Observer callback for live event consumption.
pub type EventObserver<'a> = dyn Fn(&PipelineEvent) + 'a;
