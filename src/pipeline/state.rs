//! Persisted pipeline state: the single source of truth for a story.
//!
//! Every command reads the full state before acting and persists it after
//! every transition. There is no in-memory continuity between process
//! invocations — resume is computed from this state alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::gates::GateResult;
use crate::profile::ProjectProfile;

/// Overall pipeline status for a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Initialized,
    Ready,
    InProgress,
    Complete,
    Blocked,
    Stopped,
    Failed,
}

impl PipelineStatus {
    /// Terminal states require an explicit fresh start to leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initialized => "initialized",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Blocked => "blocked",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Status of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    /// Monotonic forward transitions. The only sanctioned reversal is the
    /// explicit NEEDS_REVISION retry reset, handled by
    /// [`StageState::reset_for_retry`].
    pub fn can_advance_to(&self, next: StageStatus) -> bool {
        use StageStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Skipped)
                | (Pending, Skipped)
        )
    }
}

/// Per-stage state, mutated only by the stage that owns it and by the gate
/// evaluation immediately following it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    pub status: StageStatus,
    /// Bounded-retry count, persisted so the bound survives restarts.
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_result: Option<GateResult>,
}

impl StageState {
    pub fn pending() -> Self {
        Self {
            status: StageStatus::Pending,
            retries: 0,
            gate_result: None,
        }
    }

    /// Apply a forward transition. Re-entering the current status is a
    /// no-op so a resumed run can re-mark an interrupted stage; an
    /// unsanctioned reversal is refused and logged.
    pub fn advance_to(&mut self, next: StageStatus) {
        if self.status == next {
            return;
        }
        if !self.status.can_advance_to(next) {
            warn!(from = ?self.status, to = ?next, "refusing stage status reversal");
            return;
        }
        self.status = next;
    }

    /// Explicit NEEDS_REVISION re-entry: back to pending for another
    /// attempt, keeping the retry count.
    pub fn reset_for_retry(&mut self) {
        self.status = StageStatus::Pending;
        self.gate_result = None;
    }
}

/// An error recorded against the pipeline (never silently dropped).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineErrorEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<u32>,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// The persisted per-story pipeline state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub story_id: String,
    pub status: PipelineStatus,
    pub current_stage: u32,
    pub stages: BTreeMap<u32, StageState>,
    #[serde(default)]
    pub errors: Vec<PipelineErrorEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProjectProfile>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineState {
    /// Fresh state for a story: every catalog stage pending, positioned at
    /// the first stage.
    pub fn new(story_id: &str, stage_ids: &[u32]) -> Self {
        let now = Utc::now();
        let stages = stage_ids
            .iter()
            .map(|id| (*id, StageState::pending()))
            .collect();
        Self {
            story_id: story_id.to_string(),
            status: PipelineStatus::Initialized,
            current_stage: stage_ids.first().copied().unwrap_or(0),
            stages,
            errors: Vec::new(),
            profile: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn stage(&self, id: u32) -> Option<&StageState> {
        self.stages.get(&id)
    }

    pub fn stage_mut(&mut self, id: u32) -> &mut StageState {
        self.stages.entry(id).or_insert_with(StageState::pending)
    }

    /// Record a status change, returning the previous status.
    pub fn set_status(&mut self, status: PipelineStatus) -> PipelineStatus {
        let previous = self.status;
        self.status = status;
        self.touch();
        previous
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn record_error(&mut self, stage: Option<u32>, message: impl Into<String>) {
        self.errors.push(PipelineErrorEntry {
            stage,
            message: message.into(),
            at: Utc::now(),
        });
        self.touch();
    }

    /// Resume point in catalog order.
    ///
    /// If `current_stage` is itself completed, the first stage in catalog
    /// order not yet completed; otherwise `current_stage`. `None` when every
    /// stage is complete.
    pub fn resume_point(&self, catalog_order: &[u32]) -> Option<u32> {
        let current_complete = self
            .stage(self.current_stage)
            .map(|s| s.status == StageStatus::Completed)
            .unwrap_or(false);
        if !current_complete {
            return Some(self.current_stage);
        }
        catalog_order
            .iter()
            .copied()
            .find(|id| {
                self.stage(*id)
                    .map(|s| s.status != StageStatus::Completed)
                    .unwrap_or(true)
            })
    }

    pub fn completed_count(&self) -> usize {
        self.stages
            .values()
            .filter(|s| s.status == StageStatus::Completed)
            .count()
    }

    /// Progress percentage against the fixed catalog size.
    pub fn progress(&self, total_stages: usize) -> f64 {
        if total_stages == 0 {
            return 100.0;
        }
        (self.completed_count() as f64 / total_stages as f64) * 100.0
    }

    pub fn all_complete(&self, catalog_order: &[u32]) -> bool {
        catalog_order.iter().all(|id| {
            self.stage(*id)
                .map(|s| s.status == StageStatus::Completed)
                .unwrap_or(false)
        })
    }
}
