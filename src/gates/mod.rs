//! Quality gate evaluation between pipeline stages.
//!
//! The evaluator converts a heterogeneous per-stage result into a
//! three-valued verdict through a fixed precedence ladder. It is a pure
//! rule engine: no persistence, no I/O. `evaluate` never fails — internal
//! errors become BLOCKED results carrying a critical `gate_evaluation`
//! issue, so the state machine always receives a well-formed verdict.

pub mod checks;
pub mod config;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::errors::GateError;
use crate::pipeline::executor::StageResult;
pub use checks::{CheckResult, Severity};
pub use config::{GateConfig, gate_key};

/// Maximum gate score; an empty check list is trivially satisfied at this
/// value.
pub const MAX_SCORE: f64 = 5.0;

/// Three-valued gate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Approved,
    NeedsRevision,
    Blocked,
}

impl Verdict {
    /// Pure predicate: does this verdict halt the pipeline?
    pub fn should_block(&self) -> bool {
        matches!(self, Verdict::Blocked)
    }

    /// Pure predicate: does this verdict send the stage back for retry?
    pub fn needs_revision(&self) -> bool {
        matches!(self, Verdict::NeedsRevision)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Approved => write!(f, "APPROVED"),
            Verdict::NeedsRevision => write!(f, "NEEDS_REVISION"),
            Verdict::Blocked => write!(f, "BLOCKED"),
        }
    }
}

/// A failed check projected into the gate result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateIssue {
    pub check: String,
    pub message: String,
    pub severity: Severity,
}

/// Full record of one gate evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate_key: String,
    pub from_stage: u32,
    pub to_stage: u32,
    pub timestamp: DateTime<Utc>,
    pub verdict: Verdict,
    pub score: f64,
    pub checks: Vec<CheckResult>,
    pub issues: Vec<GateIssue>,
    /// Snapshot of the config the verdict was computed under.
    pub config: GateConfig,
}

/// Aggregate counts over all evaluations performed by one evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateSummary {
    pub total: usize,
    pub approved: usize,
    pub needs_revision: usize,
    pub blocked: usize,
    pub mean_score: f64,
}

/// All tables the evaluator needs, injected explicitly — never read from
/// module-global state.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub defaults: HashMap<String, GateConfig>,
    pub overrides: HashMap<String, GateConfig>,
    pub stage_checks: HashMap<u32, Vec<String>>,
    /// Global strict mode: any issue at all blocks.
    pub strict: bool,
}

impl EvaluatorConfig {
    /// Built-in tables with no project overrides.
    pub fn builtin() -> Self {
        Self {
            defaults: config::default_gate_table(),
            overrides: HashMap::new(),
            stage_checks: config::default_stage_checks(),
            strict: false,
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, GateConfig>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Rule-based gate evaluator with an in-process result log.
pub struct GateEvaluator {
    config: EvaluatorConfig,
    results: Vec<GateResult>,
}

impl GateEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self {
            config,
            results: Vec::new(),
        }
    }

    /// Evaluate the gate between two stages.
    ///
    /// Never fails: malformed input converts to a BLOCKED result with a
    /// critical `gate_evaluation` issue.
    pub fn evaluate(
        &mut self,
        from_stage: u32,
        to_stage: u32,
        stage_result: &StageResult,
    ) -> GateResult {
        let key = gate_key(from_stage, to_stage);
        let result = match self.try_evaluate(&key, from_stage, to_stage, stage_result) {
            Ok(result) => result,
            Err(err) => {
                debug!(gate = %key, error = %err, "gate evaluation failed internally");
                self.blocked_result(&key, from_stage, to_stage, &err.to_string())
            }
        };
        self.results.push(result.clone());
        result
    }

    fn try_evaluate(
        &self,
        key: &str,
        from_stage: u32,
        to_stage: u32,
        stage_result: &StageResult,
    ) -> Result<GateResult, GateError> {
        validate_stage_result(stage_result)?;

        let gate_config =
            config::resolve_gate_config(key, &self.config.defaults, &self.config.overrides);

        // Configured check list wins; otherwise the default list for the
        // from-stage; unknown stage means no named checks.
        let names: Vec<String> = match &gate_config.checks {
            Some(list) => list.clone(),
            None => self
                .config
                .stage_checks
                .get(&from_stage)
                .cloned()
                .unwrap_or_default(),
        };

        let mut checks: Vec<CheckResult> = names
            .iter()
            .map(|name| checks::run_named_check(name, stage_result))
            .collect();
        checks.extend(checks::dynamic_checks(&gate_config, stage_result));

        let score = if checks.is_empty() {
            MAX_SCORE
        } else {
            let passed = checks.iter().filter(|c| c.passed).count();
            (passed as f64 / checks.len() as f64) * MAX_SCORE
        };

        let issues: Vec<GateIssue> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| GateIssue {
                check: c.name.clone(),
                message: c.message.clone(),
                severity: c.severity,
            })
            .collect();

        let verdict = decide_verdict(&gate_config, self.config.strict, score, &issues);

        Ok(GateResult {
            gate_key: key.to_string(),
            from_stage,
            to_stage,
            timestamp: Utc::now(),
            verdict,
            score,
            checks,
            issues,
            config: gate_config,
        })
    }

    /// Well-formed BLOCKED result for internal evaluation failures.
    fn blocked_result(
        &self,
        key: &str,
        from_stage: u32,
        to_stage: u32,
        message: &str,
    ) -> GateResult {
        let issue = GateIssue {
            check: "gate_evaluation".to_string(),
            message: message.to_string(),
            severity: Severity::Critical,
        };
        GateResult {
            gate_key: key.to_string(),
            from_stage,
            to_stage,
            timestamp: Utc::now(),
            verdict: Verdict::Blocked,
            score: 0.0,
            checks: Vec::new(),
            issues: vec![issue],
            config: config::resolve_gate_config(
                key,
                &self.config.defaults,
                &self.config.overrides,
            ),
        }
    }

    /// All results evaluated by this instance, in order.
    pub fn results(&self) -> &[GateResult] {
        &self.results
    }

    /// Aggregate verdict counts and mean score across all stored results.
    pub fn summary(&self) -> GateSummary {
        let total = self.results.len();
        let mut summary = GateSummary {
            total,
            ..Default::default()
        };
        if total == 0 {
            return summary;
        }
        for result in &self.results {
            match result.verdict {
                Verdict::Approved => summary.approved += 1,
                Verdict::NeedsRevision => summary.needs_revision += 1,
                Verdict::Blocked => summary.blocked += 1,
            }
        }
        summary.mean_score =
            self.results.iter().map(|r| r.score).sum::<f64>() / total as f64;
        summary
    }
}

/// The verdict precedence ladder. First matching rule wins.
fn decide_verdict(
    config: &GateConfig,
    strict: bool,
    score: f64,
    issues: &[GateIssue],
) -> Verdict {
    let has_issues = !issues.is_empty();

    // 1. Strict mode: any issue at all blocks.
    if strict && has_issues {
        return Verdict::Blocked;
    }
    // 2. Any critical issue blocks regardless of configuration.
    if issues.iter().any(|i| i.severity == Severity::Critical) {
        return Verdict::Blocked;
    }
    // 3. Score floor.
    if let Some(min) = config.min_score {
        if score < min {
            return if config.blocking {
                Verdict::Blocked
            } else {
                Verdict::NeedsRevision
            };
        }
    }
    // 4. High-severity issues.
    if issues.iter().any(|i| i.severity == Severity::High) {
        return if config.blocking {
            Verdict::Blocked
        } else {
            Verdict::NeedsRevision
        };
    }
    // 5. Explicit minor-issue allowance overrides the default
    //    any-issue-means-revision rule.
    if config.allow_minor_issues == Some(true)
        && issues
            .iter()
            .all(|i| matches!(i.severity, Severity::Low | Severity::Medium))
    {
        return Verdict::Approved;
    }
    // 6. Anything left over requests revision.
    if has_issues {
        return Verdict::NeedsRevision;
    }
    // 7. Clean.
    Verdict::Approved
}

/// Reject stage results the rule engine cannot score meaningfully.
fn validate_stage_result(result: &StageResult) -> Result<(), GateError> {
    if let Some(score) = result.score {
        if !score.is_finite() || !(0.0..=MAX_SCORE).contains(&score) {
            return Err(GateError::MalformedResult(format!(
                "stage score {} is outside 0.0-{}",
                score, MAX_SCORE
            )));
        }
    }
    if let Some(coverage) = result.coverage {
        if !coverage.is_finite() || !(0.0..=100.0).contains(&coverage) {
            return Err(GateError::MalformedResult(format!(
                "coverage {} is outside 0.0-100.0",
                coverage
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_result() -> StageResult {
        StageResult {
            success: true,
            summary: "done".into(),
            artifacts: vec!["out.md".into()],
            errors: vec![],
            score: None,
            tests_passed: None,
            tests_failed: None,
            coverage: None,
        }
    }

    fn evaluator() -> GateEvaluator {
        GateEvaluator::new(EvaluatorConfig::builtin())
    }

    fn config_with(key: &str, gate: GateConfig) -> EvaluatorConfig {
        let mut overrides = HashMap::new();
        overrides.insert(key.to_string(), gate);
        EvaluatorConfig::builtin().with_overrides(overrides)
    }

    #[test]
    fn zero_checks_yields_max_score_and_approved() {
        // Stage 7 has no default checks and no configured gate entry.
        let mut eval = evaluator();
        let result = eval.evaluate(7, 8, &clean_result());
        assert_eq!(result.score, MAX_SCORE);
        assert_eq!(result.verdict, Verdict::Approved);
        assert!(result.checks.is_empty());
        assert!(result.issues.is_empty());
    }

    #[test]
    fn critical_issue_blocks_regardless_of_blocking_flag() {
        // Non-blocking gate, non-strict; a critical failure must still block.
        let mut eval = GateEvaluator::new(config_with(
            "stage1_to_stage2",
            GateConfig {
                blocking: false,
                checks: Some(vec!["no_critical_errors".into()]),
                ..Default::default()
            },
        ));
        let mut stage_result = clean_result();
        stage_result.errors.push("executor crashed".into());
        let result = eval.evaluate(1, 2, &stage_result);
        assert_eq!(result.verdict, Verdict::Blocked);
        assert!(result.verdict.should_block());
    }

    #[test]
    fn strict_mode_blocks_on_any_issue() {
        // Only a low-severity issue, but strict mode is on.
        let mut eval = GateEvaluator::new(
            config_with(
                "stage1_to_stage2",
                GateConfig {
                    checks: Some(vec!["summary_present".into()]),
                    allow_minor_issues: Some(true),
                    ..Default::default()
                },
            )
            .with_strict(true),
        );
        let mut stage_result = clean_result();
        stage_result.summary = String::new();
        let result = eval.evaluate(1, 2, &stage_result);
        assert_eq!(result.verdict, Verdict::Blocked);
    }

    #[test]
    fn allow_minor_issues_approves_low_and_medium_only() {
        let gate = GateConfig {
            checks: Some(vec!["summary_present".into(), "artifacts_present".into()]),
            allow_minor_issues: Some(true),
            ..Default::default()
        };
        let mut eval = GateEvaluator::new(config_with("stage1_to_stage2", gate.clone()));
        let mut stage_result = clean_result();
        stage_result.summary = String::new();
        stage_result.artifacts.clear();
        let result = eval.evaluate(1, 2, &stage_result);
        assert_eq!(result.verdict, Verdict::Approved);
        assert_eq!(result.issues.len(), 2);

        // The same issue set without the allowance requests revision.
        let mut gate_no_allow = gate;
        gate_no_allow.allow_minor_issues = None;
        let mut eval = GateEvaluator::new(config_with("stage1_to_stage2", gate_no_allow));
        let result = eval.evaluate(1, 2, &stage_result);
        assert_eq!(result.verdict, Verdict::NeedsRevision);
        assert!(result.verdict.needs_revision());
    }

    #[test]
    fn min_score_blocking_gate_blocks_below_threshold() {
        let mut eval = GateEvaluator::new(config_with(
            "stage2_to_stage3",
            GateConfig {
                blocking: true,
                min_score: Some(4.0),
                checks: Some(vec![
                    "summary_present".into(),
                    "artifacts_present".into(),
                ]),
                ..Default::default()
            },
        ));
        // One of two checks fails: score 2.5 < 4.0.
        let mut stage_result = clean_result();
        stage_result.artifacts.clear();
        let result = eval.evaluate(2, 3, &stage_result);
        assert_eq!(result.score, 2.5);
        assert_eq!(result.verdict, Verdict::Blocked);
    }

    #[test]
    fn min_score_non_blocking_gate_requests_revision() {
        let mut eval = GateEvaluator::new(config_with(
            "stage2_to_stage3",
            GateConfig {
                blocking: false,
                min_score: Some(4.0),
                checks: Some(vec![
                    "summary_present".into(),
                    "artifacts_present".into(),
                ]),
                ..Default::default()
            },
        ));
        let mut stage_result = clean_result();
        stage_result.artifacts.clear();
        let result = eval.evaluate(2, 3, &stage_result);
        assert_eq!(result.verdict, Verdict::NeedsRevision);
    }

    #[test]
    fn high_issue_on_non_blocking_gate_requests_revision() {
        let mut eval = GateEvaluator::new(config_with(
            "stage4_to_stage5",
            GateConfig {
                blocking: false,
                checks: Some(vec!["stage_succeeded".into()]),
                ..Default::default()
            },
        ));
        let mut stage_result = clean_result();
        stage_result.success = false;
        let result = eval.evaluate(4, 5, &stage_result);
        assert_eq!(result.verdict, Verdict::NeedsRevision);
    }

    #[test]
    fn high_issue_on_blocking_gate_blocks() {
        let mut eval = GateEvaluator::new(config_with(
            "stage4_to_stage5",
            GateConfig {
                blocking: true,
                checks: Some(vec!["stage_succeeded".into()]),
                ..Default::default()
            },
        ));
        let mut stage_result = clean_result();
        stage_result.success = false;
        let result = eval.evaluate(4, 5, &stage_result);
        assert_eq!(result.verdict, Verdict::Blocked);
    }

    #[test]
    fn malformed_score_converts_to_blocked_gate_evaluation_issue() {
        let mut eval = evaluator();
        let mut stage_result = clean_result();
        stage_result.score = Some(f64::NAN);
        let result = eval.evaluate(3, 4, &stage_result);
        assert_eq!(result.verdict, Verdict::Blocked);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].check, "gate_evaluation");
        assert_eq!(result.issues[0].severity, Severity::Critical);
    }

    #[test]
    fn out_of_range_coverage_converts_to_blocked() {
        let mut eval = evaluator();
        let mut stage_result = clean_result();
        stage_result.coverage = Some(140.0);
        let result = eval.evaluate(5, 6, &stage_result);
        assert_eq!(result.verdict, Verdict::Blocked);
        assert_eq!(result.issues[0].check, "gate_evaluation");
    }

    #[test]
    fn evaluation_is_idempotent_except_timestamp() {
        let mut eval = evaluator();
        let mut stage_result = clean_result();
        stage_result.tests_passed = Some(12);
        stage_result.tests_failed = Some(0);
        stage_result.score = Some(4.5);

        let a = eval.evaluate(3, 4, &stage_result);
        let b = eval.evaluate(3, 4, &stage_result);
        assert_eq!(a.verdict, b.verdict);
        assert_eq!(a.score, b.score);
        assert_eq!(a.checks, b.checks);
        assert_eq!(a.issues, b.issues);
        assert_eq!(a.config, b.config);
        assert_eq!(a.gate_key, b.gate_key);
    }

    #[test]
    fn default_implement_gate_approves_clean_tested_result() {
        let mut eval = evaluator();
        let mut stage_result = clean_result();
        stage_result.tests_passed = Some(8);
        stage_result.tests_failed = Some(0);
        let result = eval.evaluate(3, 4, &stage_result);
        assert_eq!(result.verdict, Verdict::Approved);
        // Named checks for stage 3 plus the dynamic test check.
        assert_eq!(result.checks.len(), 4);
    }

    #[test]
    fn summary_aggregates_counts_and_mean_score() {
        let mut eval = evaluator();
        // Approved at max score (stage 7 has no checks).
        eval.evaluate(7, 8, &clean_result());
        // Blocked at score 0 via a critical failure on stage 4's defaults.
        let mut failed = clean_result();
        failed.errors.push("boom".into());
        failed.success = false;
        eval.evaluate(4, 5, &failed);

        let summary = eval.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.approved, 1);
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.needs_revision, 0);
        assert_eq!(summary.mean_score, MAX_SCORE / 2.0);
    }

    #[test]
    fn empty_summary_is_all_zero() {
        let eval = evaluator();
        let summary = eval.summary();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.mean_score, 0.0);
    }

    #[test]
    fn result_log_preserves_order() {
        let mut eval = evaluator();
        eval.evaluate(1, 2, &clean_result());
        eval.evaluate(2, 3, &clean_result());
        let keys: Vec<&str> = eval.results().iter().map(|r| r.gate_key.as_str()).collect();
        assert_eq!(keys, vec!["stage1_to_stage2", "stage2_to_stage3"]);
    }
}
