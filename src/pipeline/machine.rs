//! The pipeline state machine: drives a story through the stage catalog.
//!
//! One machine instance owns one run attempt. Every transition is persisted
//! before the machine moves on, so a crash at any point leaves a state file
//! a later `resume` can pick up. Stop requests are cooperative: another
//! process writes `stopped` into the state file and this machine observes
//! it on the re-read between stages, never mid-stage.

use tracing::{debug, warn};

use crate::config::Config;
use crate::errors::PipelineError;
use crate::gates::{EvaluatorConfig, GateEvaluator, Verdict};
use crate::lifecycle::LifecycleReclaimer;
use crate::lock::LockCoordinator;
use crate::pipeline::events::{EventObserver, PipelineEvent};
use crate::pipeline::executor::{StageExecutor, StageResult};
use crate::pipeline::state::{
    PipelineErrorEntry, PipelineState, PipelineStatus, StageStatus,
};
use crate::pipeline::store::StateStore;
use crate::profile;
use crate::settings::EpicToml;
use crate::stages::StageCatalog;

/// How a run attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every catalog stage completed and its gate approved.
    Completed,
    /// A gate blocked, or the retry bound ran out, at this stage.
    Blocked { stage: u32 },
    /// A cooperative stop request was observed between stages.
    Stopped,
}

/// Point-in-time view of a story, as reported by `status`.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub story_id: String,
    pub status: PipelineStatus,
    pub current_stage: u32,
    pub completed_stages: usize,
    pub total_stages: usize,
    pub progress: f64,
    pub stages: Vec<StageLine>,
    pub errors: Vec<PipelineErrorEntry>,
}

/// One stage row in a status report, in catalog order.
#[derive(Debug, Clone)]
pub struct StageLine {
    pub id: u32,
    pub name: String,
    pub status: StageStatus,
    pub retries: u32,
}

impl StatusReport {
    /// Build a report from persisted state and the catalog alone, so the
    /// read-only commands need no settings or executor.
    pub fn from_state(state: &PipelineState, catalog: &StageCatalog) -> Self {
        let stages = catalog
            .ids()
            .into_iter()
            .map(|id| {
                let name = catalog.get(id).map(|s| s.name.clone()).unwrap_or_default();
                let (status, retries) = state
                    .stage(id)
                    .map(|s| (s.status, s.retries))
                    .unwrap_or((StageStatus::Pending, 0));
                StageLine {
                    id,
                    name,
                    status,
                    retries,
                }
            })
            .collect();

        Self {
            story_id: state.story_id.clone(),
            status: state.status,
            current_stage: state.current_stage,
            completed_stages: state.completed_count(),
            total_stages: catalog.len(),
            progress: state.progress(catalog.len()),
            stages,
            errors: state.errors.clone(),
        }
    }
}

pub struct PipelineMachine {
    config: Config,
    settings: EpicToml,
    store: StateStore,
    catalog: StageCatalog,
    evaluator: GateEvaluator,
    executor: Box<dyn StageExecutor>,
    observer: Option<Box<EventObserver<'static>>>,
}

impl PipelineMachine {
    pub fn new(
        config: Config,
        settings: EpicToml,
        catalog: StageCatalog,
        executor: Box<dyn StageExecutor>,
    ) -> Self {
        let evaluator = GateEvaluator::new(
            EvaluatorConfig::builtin()
                .with_overrides(settings.gates.clone())
                .with_strict(settings.pipeline.strict),
        );
        let store = StateStore::new(config.state_dir());
        Self {
            config,
            settings,
            store,
            catalog,
            evaluator,
            executor,
            observer: None,
        }
    }

    /// Attach a live event observer (the terminal UI, or a test probe).
    pub fn with_observer(mut self, observer: Box<EventObserver<'static>>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }

    /// Start a story: create its state if absent, then run from the resume
    /// point (or the explicit `from` stage).
    pub async fn start(
        &mut self,
        story_id: &str,
        from: Option<u32>,
    ) -> Result<RunOutcome, PipelineError> {
        self.config
            .ensure_directories()
            .map_err(PipelineError::Other)?;

        let state = match self.store.load(story_id)? {
            Some(existing) => {
                if existing.status == PipelineStatus::Complete {
                    return Err(PipelineError::AlreadyComplete {
                        story_id: story_id.to_string(),
                    });
                }
                existing
            }
            None => {
                debug!(story = story_id, "creating fresh pipeline state");
                PipelineState::new(story_id, &self.catalog.ids())
            }
        };
        self.run(state, from).await
    }

    /// Resume an existing story. `fresh` discards the state of a completed
    /// story and starts over; without it a completed story is refused.
    pub async fn resume(
        &mut self,
        story_id: &str,
        from: Option<u32>,
        fresh: bool,
    ) -> Result<RunOutcome, PipelineError> {
        self.config
            .ensure_directories()
            .map_err(PipelineError::Other)?;

        let state = match self.store.load(story_id)? {
            None => {
                return Err(PipelineError::StateNotFound {
                    story_id: story_id.to_string(),
                })
            }
            Some(existing) if existing.status == PipelineStatus::Complete => {
                if !fresh {
                    return Err(PipelineError::AlreadyComplete {
                        story_id: story_id.to_string(),
                    });
                }
                debug!(story = story_id, "discarding completed state for fresh run");
                self.store.remove(story_id)?;
                PipelineState::new(story_id, &self.catalog.ids())
            }
            Some(existing) => existing,
        };
        self.run(state, from).await
    }

    /// Record a cooperative stop request. The running machine observes it
    /// between stages; stage history and `current_stage` stay untouched.
    pub fn stop(&self, story_id: &str) -> Result<(), PipelineError> {
        let previous = request_stop(&self.store, story_id)?;
        self.emit(PipelineEvent::StatusChanged {
            from: previous,
            to: PipelineStatus::Stopped,
        });
        Ok(())
    }

    /// Read-only view of a story's state.
    pub fn status(&self, story_id: &str) -> Result<StatusReport, PipelineError> {
        story_status(&self.store, &self.catalog, story_id)
    }

    /// Save mid-run state without clobbering a stop request another
    /// process persisted while the stage was executing.
    fn persist_during_run(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        if let Some(persisted) = self.store.load(&state.story_id)? {
            if persisted.status == PipelineStatus::Stopped
                && state.status == PipelineStatus::InProgress
            {
                state.status = PipelineStatus::Stopped;
            }
        }
        self.store.save(state)
    }

    async fn run(
        &mut self,
        mut state: PipelineState,
        from: Option<u32>,
    ) -> Result<RunOutcome, PipelineError> {
        let max_retries = self.settings.max_stage_retries().map_err(PipelineError::Other)?;

        // Hygiene pass before taking the lock: a previous crashed run may
        // have left its own lock behind.
        let reclaim = LifecycleReclaimer::new(self.config.clone(), self.settings.lifecycle.clone())
            .reclaim();
        for error in &reclaim.errors {
            warn!(%error, "reclamation sweep reported a failure");
        }

        let coordinator = LockCoordinator::new(self.config.locks_dir());
        let guard = coordinator.acquire(&state.story_id, self.settings.lifecycle.lock_ttl_secs)?;

        if state.profile.is_none() {
            state.profile = Some(profile::probe(&self.config.project_dir));
        }

        let previous = state.set_status(PipelineStatus::InProgress);
        self.store.save(&state)?;
        self.emit(PipelineEvent::StatusChanged {
            from: previous,
            to: PipelineStatus::InProgress,
        });

        let order = self.catalog.ids();
        let mut next = match from {
            Some(id) => {
                if self.catalog.get(id).is_none() {
                    return Err(PipelineError::UnknownStage { stage: id });
                }
                Some(id)
            }
            None => state.resume_point(&order),
        };

        while let Some(stage_id) = next {
            // Stop intent is written by another process; the persisted file
            // is the only channel, so re-read it between stages.
            if let Some(persisted) = self.store.load(&state.story_id)? {
                if persisted.status == PipelineStatus::Stopped {
                    debug!(story = %state.story_id, "stop request observed, halting between stages");
                    return Ok(RunOutcome::Stopped);
                }
            }

            let spec = match self.catalog.get(stage_id) {
                Some(spec) => spec.clone(),
                None => return Err(PipelineError::UnknownStage { stage: stage_id }),
            };

            if state
                .stage(stage_id)
                .map(|s| s.status == StageStatus::Completed)
                .unwrap_or(false)
            {
                next = self.catalog.next_after(stage_id);
                continue;
            }

            state.current_stage = stage_id;
            state.stage_mut(stage_id).advance_to(StageStatus::InProgress);
            state.touch();
            self.store.save(&state)?;
            self.emit(PipelineEvent::StageStarted {
                stage: stage_id,
                name: spec.name.clone(),
            });

            let result = match self.executor.execute(&state.story_id, &spec).await {
                Ok(result) => result,
                Err(err) => {
                    // An executor crash is a stage failure, not a machine
                    // crash: the gate sees it and blocks.
                    state.record_error(Some(stage_id), err.to_string());
                    StageResult::from_failure(err.to_string())
                }
            };

            let to_stage = self.catalog.next_after(stage_id).unwrap_or(stage_id + 1);
            let gate = self.evaluator.evaluate(stage_id, to_stage, &result);

            match gate.verdict {
                Verdict::Approved => {
                    let stage_state = state.stage_mut(stage_id);
                    stage_state.advance_to(StageStatus::Completed);
                    stage_state.gate_result = Some(gate.clone());
                    if let Some(following) = self.catalog.next_after(stage_id) {
                        state.current_stage = following;
                    }
                    state.touch();
                    self.persist_during_run(&mut state)?;
                    self.emit(PipelineEvent::StageCompleted {
                        stage: stage_id,
                        name: spec.name.clone(),
                        gate,
                    });
                    next = self.catalog.next_after(stage_id);
                }
                Verdict::NeedsRevision => {
                    let stage_state = state.stage_mut(stage_id);
                    stage_state.retries += 1;
                    let retries = stage_state.retries;
                    if retries > max_retries {
                        stage_state.advance_to(StageStatus::Failed);
                        stage_state.gate_result = Some(gate);
                        state.record_error(
                            Some(stage_id),
                            format!("retry bound exhausted after {retries} attempts"),
                        );
                        let previous = state.set_status(PipelineStatus::Blocked);
                        self.store.save(&state)?;
                        self.emit(PipelineEvent::StatusChanged {
                            from: previous,
                            to: PipelineStatus::Blocked,
                        });
                        return Ok(RunOutcome::Blocked { stage: stage_id });
                    }
                    stage_state.reset_for_retry();
                    state.touch();
                    self.persist_during_run(&mut state)?;
                    self.emit(PipelineEvent::StageRetry {
                        stage: stage_id,
                        retries,
                        max_retries,
                    });
                    next = Some(stage_id);
                }
                Verdict::Blocked => {
                    let stage_state = state.stage_mut(stage_id);
                    stage_state.advance_to(StageStatus::Failed);
                    stage_state.gate_result = Some(gate);
                    let previous = state.set_status(PipelineStatus::Blocked);
                    self.store.save(&state)?;
                    self.emit(PipelineEvent::StatusChanged {
                        from: previous,
                        to: PipelineStatus::Blocked,
                    });
                    return Ok(RunOutcome::Blocked { stage: stage_id });
                }
            }
        }

        let previous = state.set_status(PipelineStatus::Complete);
        self.store.save(&state)?;
        self.emit(PipelineEvent::StatusChanged {
            from: previous,
            to: PipelineStatus::Complete,
        });
        guard.release()?;
        Ok(RunOutcome::Completed)
    }
}

/// Write a stop request into persisted state, returning the status it
/// replaced. Operates on the store alone so control commands work without
/// settings or an executor.
pub fn request_stop(store: &StateStore, story_id: &str) -> Result<PipelineStatus, PipelineError> {
    let mut state = store
        .load(story_id)?
        .ok_or_else(|| PipelineError::StateNotFound {
            story_id: story_id.to_string(),
        })?;
    let previous = state.set_status(PipelineStatus::Stopped);
    store.save(&state)?;
    Ok(previous)
}

/// Read-only report over persisted state alone.
pub fn story_status(
    store: &StateStore,
    catalog: &StageCatalog,
    story_id: &str,
) -> Result<StatusReport, PipelineError> {
    let state = store
        .load(story_id)?
        .ok_or_else(|| PipelineError::StateNotFound {
            story_id: story_id.to_string(),
        })?;
    Ok(StatusReport::from_state(&state, catalog))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::config::GateConfig;
    use crate::stages::StageSpec;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    /// Replays a fixed queue of stage results and records which stages ran.
    struct ScriptedExecutor {
        script: Mutex<VecDeque<StageResult>>,
        calls: Arc<Mutex<Vec<u32>>>,
    }

    impl ScriptedExecutor {
        fn new(results: Vec<StageResult>) -> (Self, Arc<Mutex<Vec<u32>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    script: Mutex::new(results.into()),
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl StageExecutor for ScriptedExecutor {
        async fn execute(&self, _story_id: &str, stage: &StageSpec) -> Result<StageResult> {
            self.calls.lock().unwrap().push(stage.id);
            Ok(self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(ok_result))
        }
    }

    /// Fails the spawn itself, as if the agent binary were missing.
    struct BrokenExecutor;

    #[async_trait]
    impl StageExecutor for BrokenExecutor {
        async fn execute(&self, _story_id: &str, _stage: &StageSpec) -> Result<StageResult> {
            anyhow::bail!("executor binary not found")
        }
    }

    fn ok_result() -> StageResult {
        StageResult {
            success: true,
            summary: "done".into(),
            artifacts: vec!["out.md".into()],
            score: Some(5.0),
            tests_passed: Some(4),
            tests_failed: Some(0),
            coverage: Some(95.0),
            ..Default::default()
        }
    }

    fn settings(max_retries: u32) -> EpicToml {
        let mut settings = EpicToml::default();
        settings.pipeline.max_stage_retries = Some(max_retries);
        settings
    }

    fn two_stage_catalog() -> StageCatalog {
        StageCatalog {
            stages: vec![StageSpec::new(1, "analyze"), StageSpec::new(2, "deliver")],
        }
    }

    fn machine(
        dir: &std::path::Path,
        settings: EpicToml,
        catalog: StageCatalog,
        executor: Box<dyn StageExecutor>,
    ) -> PipelineMachine {
        let config = Config::new(dir.to_path_buf()).unwrap();
        PipelineMachine::new(config, settings, catalog, executor)
    }

    #[tokio::test]
    async fn full_run_completes_every_stage() {
        let dir = tempdir().unwrap();
        let (executor, calls) = ScriptedExecutor::new(vec![]);
        let mut m = machine(
            dir.path(),
            settings(2),
            StageCatalog::builtin(),
            Box::new(executor),
        );

        let outcome = m.start("S1", None).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(*calls.lock().unwrap(), vec![1, 2, 3, 4, 5, 6, 7]);

        let report = m.status("S1").unwrap();
        assert_eq!(report.status, PipelineStatus::Complete);
        assert_eq!(report.completed_stages, 7);
        assert!((report.progress - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn run_releases_the_story_lock_on_completion() {
        let dir = tempdir().unwrap();
        let (executor, _) = ScriptedExecutor::new(vec![]);
        let mut m = machine(dir.path(), settings(0), two_stage_catalog(), Box::new(executor));
        m.start("S1", None).await.unwrap();
        assert!(!dir
            .path()
            .join(".epicflow/locks/S1.lock.json")
            .exists());
    }

    #[tokio::test]
    async fn needs_revision_retries_same_stage_then_advances() {
        let dir = tempdir().unwrap();
        // Non-blocking min_score gate on 1->2: a low score asks for
        // revision instead of blocking.
        let mut settings = settings(2);
        settings.gates.insert(
            "stage1_to_stage2".to_string(),
            GateConfig {
                blocking: false,
                min_score: Some(4.0),
                ..Default::default()
            },
        );
        let low = StageResult {
            score: Some(2.0),
            ..ok_result()
        };
        let (executor, calls) = ScriptedExecutor::new(vec![low, ok_result(), ok_result()]);
        let mut m = machine(dir.path(), settings, two_stage_catalog(), Box::new(executor));

        let outcome = m.start("S1", None).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        // Stage 1 ran twice, stage 2 once.
        assert_eq!(*calls.lock().unwrap(), vec![1, 1, 2]);

        let report = m.status("S1").unwrap();
        assert_eq!(report.stages[0].retries, 1);
        assert_eq!(report.stages[0].status, StageStatus::Completed);
    }

    #[tokio::test]
    async fn exhausted_retry_bound_escalates_to_blocked() {
        let dir = tempdir().unwrap();
        let mut settings = settings(1);
        settings.gates.insert(
            "stage1_to_stage2".to_string(),
            GateConfig {
                blocking: false,
                min_score: Some(4.0),
                ..Default::default()
            },
        );
        let low = StageResult {
            score: Some(1.0),
            ..ok_result()
        };
        let (executor, calls) = ScriptedExecutor::new(vec![low.clone(), low.clone(), low]);
        let mut m = machine(dir.path(), settings, two_stage_catalog(), Box::new(executor));

        let outcome = m.start("S1", None).await.unwrap();
        assert_eq!(outcome, RunOutcome::Blocked { stage: 1 });
        // First attempt plus one permitted retry.
        assert_eq!(*calls.lock().unwrap(), vec![1, 1]);

        let report = m.status("S1").unwrap();
        assert_eq!(report.status, PipelineStatus::Blocked);
        assert_eq!(report.stages[0].status, StageStatus::Failed);
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("retry bound exhausted")));
    }

    #[tokio::test]
    async fn blocking_gate_failure_blocks_immediately() {
        let dir = tempdir().unwrap();
        let mut settings = settings(5);
        settings.gates.insert(
            "stage1_to_stage2".to_string(),
            GateConfig {
                blocking: true,
                min_score: Some(4.0),
                ..Default::default()
            },
        );
        let low = StageResult {
            score: Some(1.0),
            ..ok_result()
        };
        let (executor, calls) = ScriptedExecutor::new(vec![low]);
        let mut m = machine(dir.path(), settings, two_stage_catalog(), Box::new(executor));

        let outcome = m.start("S1", None).await.unwrap();
        assert_eq!(outcome, RunOutcome::Blocked { stage: 1 });
        assert_eq!(*calls.lock().unwrap(), vec![1]);
        assert_eq!(m.status("S1").unwrap().stages[0].retries, 0);
    }

    #[tokio::test]
    async fn executor_crash_becomes_blocked_with_recorded_error() {
        let dir = tempdir().unwrap();
        let mut m = machine(
            dir.path(),
            settings(2),
            two_stage_catalog(),
            Box::new(BrokenExecutor),
        );

        let outcome = m.start("S1", None).await.unwrap();
        assert_eq!(outcome, RunOutcome::Blocked { stage: 1 });

        let report = m.status("S1").unwrap();
        assert_eq!(report.status, PipelineStatus::Blocked);
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("executor binary not found")));
    }

    #[tokio::test]
    async fn resume_skips_completed_stages() {
        let dir = tempdir().unwrap();
        let mut settings_blocking = settings(0);
        settings_blocking.gates.insert(
            "stage2_to_stage3".to_string(),
            GateConfig {
                blocking: true,
                min_score: Some(4.0),
                ..Default::default()
            },
        );
        let catalog = StageCatalog {
            stages: vec![
                StageSpec::new(1, "analyze"),
                StageSpec::new(2, "design"),
                StageSpec::new(3, "deliver"),
            ],
        };
        let low = StageResult {
            score: Some(1.0),
            ..ok_result()
        };
        let (executor, calls) = ScriptedExecutor::new(vec![ok_result(), low]);
        let mut m = machine(
            dir.path(),
            settings_blocking.clone(),
            catalog.clone(),
            Box::new(executor),
        );
        let outcome = m.start("S1", None).await.unwrap();
        assert_eq!(outcome, RunOutcome::Blocked { stage: 2 });
        assert_eq!(*calls.lock().unwrap(), vec![1, 2]);

        // New machine, same state on disk: resume re-runs only stage 2 on.
        let (executor, calls) = ScriptedExecutor::new(vec![]);
        let mut m = machine(dir.path(), settings_blocking, catalog, Box::new(executor));
        let outcome = m.resume("S1", None, false).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(*calls.lock().unwrap(), vec![2, 3]);
    }

    #[tokio::test]
    async fn resume_of_completed_story_is_refused_without_fresh() {
        let dir = tempdir().unwrap();
        let (executor, _) = ScriptedExecutor::new(vec![]);
        let mut m = machine(dir.path(), settings(0), two_stage_catalog(), Box::new(executor));
        m.start("S1", None).await.unwrap();

        let err = m.resume("S1", None, false).await.unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyComplete { .. }));
        // Starting a completed story again is the same refusal.
        let err = m.start("S1", None).await.unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyComplete { .. }));
    }

    #[tokio::test]
    async fn fresh_resume_discards_state_and_reruns_everything() {
        let dir = tempdir().unwrap();
        let (executor, _) = ScriptedExecutor::new(vec![]);
        let mut m = machine(dir.path(), settings(0), two_stage_catalog(), Box::new(executor));
        m.start("S1", None).await.unwrap();

        let (executor, calls) = ScriptedExecutor::new(vec![]);
        let mut m = machine(dir.path(), settings(0), two_stage_catalog(), Box::new(executor));
        let outcome = m.resume("S1", None, true).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(*calls.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn resume_of_unknown_story_is_not_found() {
        let dir = tempdir().unwrap();
        let (executor, _) = ScriptedExecutor::new(vec![]);
        let mut m = machine(dir.path(), settings(0), two_stage_catalog(), Box::new(executor));
        let err = m.resume("GHOST", None, false).await.unwrap_err();
        assert!(matches!(err, PipelineError::StateNotFound { .. }));
    }

    #[tokio::test]
    async fn stop_and_status_on_unknown_story_are_not_found() {
        let dir = tempdir().unwrap();
        let (executor, _) = ScriptedExecutor::new(vec![]);
        let m = machine(dir.path(), settings(0), two_stage_catalog(), Box::new(executor));
        assert!(matches!(
            m.stop("GHOST"),
            Err(PipelineError::StateNotFound { .. })
        ));
        assert!(matches!(
            m.status("GHOST"),
            Err(PipelineError::StateNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn request_stop_persists_and_reports_previous_status() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf()).unwrap();
        config.ensure_directories().unwrap();
        let store = StateStore::new(config.state_dir());
        store.save(&PipelineState::new("S1", &[1, 2])).unwrap();

        let previous = request_stop(&store, "S1").unwrap();
        assert_eq!(previous, PipelineStatus::Initialized);
        let report = story_status(&store, &two_stage_catalog(), "S1").unwrap();
        assert_eq!(report.status, PipelineStatus::Stopped);
    }

    #[tokio::test]
    async fn explicit_from_stage_must_exist_in_catalog() {
        let dir = tempdir().unwrap();
        let (executor, _) = ScriptedExecutor::new(vec![]);
        let mut m = machine(dir.path(), settings(0), two_stage_catalog(), Box::new(executor));
        let err = m.start("S1", Some(9)).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownStage { stage: 9 }));
    }

    /// Writes a stop request into the persisted state while a stage runs,
    /// the way a concurrent `epicflow stop` invocation would.
    struct StoppingExecutor {
        state_dir: std::path::PathBuf,
    }

    #[async_trait]
    impl StageExecutor for StoppingExecutor {
        async fn execute(&self, story_id: &str, _stage: &StageSpec) -> Result<StageResult> {
            let store = StateStore::new(self.state_dir.clone());
            let mut state = store.load(story_id)?.expect("state exists during run");
            state.set_status(PipelineStatus::Stopped);
            store.save(&state)?;
            Ok(ok_result())
        }
    }

    #[tokio::test]
    async fn stop_request_is_observed_between_stages() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf()).unwrap();
        let mut m = PipelineMachine::new(
            config.clone(),
            settings(0),
            two_stage_catalog(),
            Box::new(StoppingExecutor {
                state_dir: config.state_dir(),
            }),
        );

        let outcome = m.start("S1", None).await.unwrap();
        assert_eq!(outcome, RunOutcome::Stopped);
        // The stop wins over the machine's own completed-stage bookkeeping.
        let report = m.status("S1").unwrap();
        assert_eq!(report.status, PipelineStatus::Stopped);
        assert_eq!(report.stages[1].status, StageStatus::Pending);
    }

    #[tokio::test]
    async fn observer_sees_lifecycle_events_in_order() {
        let dir = tempdir().unwrap();
        let (executor, _) = ScriptedExecutor::new(vec![]);
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut m = machine(dir.path(), settings(0), two_stage_catalog(), Box::new(executor))
            .with_observer(Box::new(move |event| {
                let tag = match event {
                    PipelineEvent::StageStarted { stage, .. } => format!("start:{stage}"),
                    PipelineEvent::StageCompleted { stage, .. } => format!("done:{stage}"),
                    PipelineEvent::StageRetry { stage, .. } => format!("retry:{stage}"),
                    PipelineEvent::StatusChanged { to, .. } => format!("status:{to}"),
                };
                sink.lock().unwrap().push(tag);
            }));

        m.start("S1", None).await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "status:in_progress",
                "start:1",
                "done:1",
                "start:2",
                "done:2",
                "status:complete",
            ]
        );
    }

    #[tokio::test]
    async fn missing_retry_bound_fails_the_run() {
        let dir = tempdir().unwrap();
        let (executor, _) = ScriptedExecutor::new(vec![]);
        let mut m = machine(
            dir.path(),
            EpicToml::default(),
            two_stage_catalog(),
            Box::new(executor),
        );
        assert!(m.start("S1", None).await.is_err());
    }
}
