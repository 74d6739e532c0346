//! Named gate checks and dynamically appended threshold checks.
//!
//! Every check is a pure predicate over a [`StageResult`]. Threshold checks
//! are appended only when the stage result actually carries the field they
//! inspect — an absent field means "not applicable", never "failed".

use serde::{Deserialize, Serialize};

use crate::gates::config::GateConfig;
use crate::pipeline::executor::StageResult;

/// Severity of a failed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Outcome of a single gate check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub severity: Severity,
}

impl CheckResult {
    fn pass(name: &str, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: message.into(),
            severity,
        }
    }

    fn fail(name: &str, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: message.into(),
            severity,
        }
    }
}

/// Run a named check from the registry against a stage result.
///
/// An unknown name produces a failed medium-severity check, so a typo in a
/// configured check list surfaces in the verdict instead of silently
/// shrinking the list.
pub fn run_named_check(name: &str, result: &StageResult) -> CheckResult {
    match name {
        "no_critical_errors" => {
            if result.errors.is_empty() {
                CheckResult::pass(name, "no errors reported", Severity::Critical)
            } else {
                CheckResult::fail(
                    name,
                    format!("{} error(s) reported: {}", result.errors.len(), result.errors.join("; ")),
                    Severity::Critical,
                )
            }
        }
        "stage_succeeded" => {
            if result.success {
                CheckResult::pass(name, "stage reported success", Severity::High)
            } else {
                CheckResult::fail(name, "stage reported failure", Severity::High)
            }
        }
        "artifacts_present" => {
            if result.artifacts.is_empty() {
                CheckResult::fail(name, "stage produced no artifacts", Severity::Medium)
            } else {
                CheckResult::pass(
                    name,
                    format!("{} artifact(s) produced", result.artifacts.len()),
                    Severity::Medium,
                )
            }
        }
        "summary_present" => {
            if result.summary.trim().is_empty() {
                CheckResult::fail(name, "stage produced no summary", Severity::Low)
            } else {
                CheckResult::pass(name, "summary present", Severity::Low)
            }
        }
        other => CheckResult::fail(
            other,
            format!("unknown check '{}' in gate configuration", other),
            Severity::Medium,
        ),
    }
}

/// Build the dynamically appended threshold checks for a gate.
///
/// Each is included only when the gate config asks for it AND the stage
/// result carries the relevant field.
pub fn dynamic_checks(config: &GateConfig, result: &StageResult) -> Vec<CheckResult> {
    let mut checks = Vec::new();

    if let (Some(min), Some(score)) = (config.min_score, result.score) {
        if score >= min {
            checks.push(CheckResult::pass(
                "score_threshold",
                format!("stage score {:.1} meets minimum {:.1}", score, min),
                Severity::High,
            ));
        } else {
            checks.push(CheckResult::fail(
                "score_threshold",
                format!("stage score {:.1} below minimum {:.1}", score, min),
                Severity::High,
            ));
        }
    }

    if config.require_tests == Some(true)
        && (result.tests_passed.is_some() || result.tests_failed.is_some())
    {
        let passed = result.tests_passed.unwrap_or(0);
        let failed = result.tests_failed.unwrap_or(0);
        if passed > 0 && failed == 0 {
            checks.push(CheckResult::pass(
                "tests_required",
                format!("{} test(s) passed", passed),
                Severity::High,
            ));
        } else {
            checks.push(CheckResult::fail(
                "tests_required",
                format!("{} passed, {} failed", passed, failed),
                Severity::High,
            ));
        }
    }

    if let (Some(min), Some(coverage)) = (config.min_test_coverage, result.coverage) {
        if coverage >= min {
            checks.push(CheckResult::pass(
                "coverage_threshold",
                format!("coverage {:.1}% meets minimum {:.1}%", coverage, min),
                Severity::Medium,
            ));
        } else {
            checks.push(CheckResult::fail(
                "coverage_threshold",
                format!("coverage {:.1}% below minimum {:.1}%", coverage, min),
                Severity::Medium,
            ));
        }
    }

    checks
}
