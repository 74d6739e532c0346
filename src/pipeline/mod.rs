//! Persisted, resumable pipeline execution for a single story.

pub mod events;
pub mod executor;
pub mod machine;
pub mod state;
pub mod store;

pub use events::{EventObserver, PipelineEvent};
pub use executor::{ProcessStageExecutor, StageExecutor, StageResult};
pub use machine::{
    PipelineMachine, RunOutcome, StageLine, StatusReport, request_stop, story_status,
};
pub use state::{PipelineState, PipelineStatus, StageState, StageStatus};
pub use store::StateStore;
