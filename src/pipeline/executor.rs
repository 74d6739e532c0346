//! External stage executor boundary.
//!
//! The work performed inside a stage is opaque to the orchestrator: an
//! external agent process runs it and reports a [`StageResult`]. The
//! process-backed implementation spawns the configured command per stage,
//! captures its output to a log file, and parses the final JSON object the
//! agent prints as the stage result.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::stages::StageSpec;
use crate::util::extract_last_json_object;

/// What a stage reports back to the orchestrator.
///
/// Optional fields mean "not applicable" when absent — a stage with no test
/// phase simply omits the test counts and is not penalized for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Stage's self-reported quality score (0.0 - 5.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_passed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_failed: Option<u32>,
    /// Test coverage percentage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
}

impl StageResult {
    /// Result representing an executor-level failure, fed into the gate so
    /// the critical `no_critical_errors` check fails and blocks the
    /// pipeline instead of crashing the process.
    pub fn from_failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            summary: message.clone(),
            errors: vec![message],
            ..Default::default()
        }
    }
}

/// The opaque external collaborator that runs a stage.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, story_id: &str, stage: &StageSpec) -> Result<StageResult>;
}

/// Process-backed executor: spawns the configured agent command once per
/// stage attempt.
pub struct ProcessStageExecutor {
    command: String,
    args: Vec<String>,
    project_dir: PathBuf,
    log_dir: PathBuf,
}

impl ProcessStageExecutor {
    pub fn new(
        command: String,
        args: Vec<String>,
        project_dir: PathBuf,
        log_dir: PathBuf,
    ) -> Self {
        Self {
            command,
            args,
            project_dir,
            log_dir,
        }
    }

    fn output_file(&self, story_id: &str, stage: &StageSpec) -> PathBuf {
        self.log_dir
            .join(format!("{}-stage-{}-output.log", story_id, stage.id))
    }
}

#[async_trait]
impl StageExecutor for ProcessStageExecutor {
    async fn execute(&self, story_id: &str, stage: &StageSpec) -> Result<StageResult> {
        let output = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .env("EPICFLOW_STORY_ID", story_id)
            .env("EPICFLOW_STAGE_ID", stage.id.to_string())
            .env("EPICFLOW_STAGE_NAME", &stage.name)
            .current_dir(&self.project_dir)
            .output()
            .await
            .with_context(|| format!("Failed to spawn stage executor '{}'", self.command))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        let log_path = self.output_file(story_id, stage);
        std::fs::write(&log_path, format!("{stdout}\n--- stderr ---\n{stderr}"))
            .with_context(|| format!("Failed to write executor log: {}", log_path.display()))?;

        debug!(
            stage = stage.id,
            exit_code,
            log = %log_path.display(),
            "stage executor finished"
        );

        Ok(parse_executor_output(&stdout, exit_code))
    }
}

/// Derive a [`StageResult`] from raw executor output.
///
/// The agent protocol prints a final JSON result object; when none is
/// present, the exit code decides success and the captured output becomes
/// the summary.
pub fn parse_executor_output(stdout: &str, exit_code: i32) -> StageResult {
    if let Some(json) = extract_last_json_object(stdout) {
        if let Ok(result) = serde_json::from_str::<StageResult>(&json) {
            return result;
        }
    }
    if exit_code == 0 {
        StageResult {
            success: true,
            summary: stdout.trim().to_string(),
            ..Default::default()
        }
    } else {
        StageResult::from_failure(format!(
            "stage executor exited with code {exit_code}"
        ))
    }
}
