//! Gate configuration: per-gate entries, the built-in default table, and
//! whole-entry override resolution.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration for a single quality gate.
///
/// Project entries in `epicflow.toml` replace the built-in entry for the
/// same key **wholesale** — absent fields fall back to this struct's
/// defaults, never to the built-in entry's values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// When true, threshold and high-severity failures block instead of
    /// requesting revision.
    #[serde(default)]
    pub blocking: bool,
    /// Minimum acceptable gate score (0.0 - 5.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    /// Require the stage to have run tests (applies only when the stage
    /// result reports test counts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_tests: Option<bool>,
    /// Minimum test coverage percentage (applies only when the stage result
    /// reports coverage).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_test_coverage: Option<f64>,
    /// Explicit check list; when absent the default list for the from-stage
    /// is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<Vec<String>>,
    /// When set, a gate whose only issues are low/medium severity is
    /// approved outright.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_minor_issues: Option<bool>,
}

/// Build the canonical gate key for a stage pair.
pub fn gate_key(from_stage: u32, to_stage: u32) -> String {
    format!("stage{}_to_stage{}", from_stage, to_stage)
}

/// Built-in default gate table.
///
/// implement → test requires tests and a baseline score; review → integrate
/// additionally enforces a coverage floor. Every other pair falls back to a
/// permissive non-blocking entry.
pub fn default_gate_table() -> HashMap<String, GateConfig> {
    let mut table = HashMap::new();
    table.insert(
        gate_key(3, 4),
        GateConfig {
            blocking: true,
            min_score: Some(3.0),
            require_tests: Some(true),
            ..Default::default()
        },
    );
    table.insert(
        gate_key(5, 6),
        GateConfig {
            blocking: true,
            min_score: Some(4.0),
            min_test_coverage: Some(70.0),
            ..Default::default()
        },
    );
    table
}

/// Built-in default check lists keyed by from-stage id.
///
/// Stages without an entry get an empty list, which the evaluator treats as
/// trivially satisfied.
pub fn default_stage_checks() -> HashMap<u32, Vec<String>> {
    let mut table = HashMap::new();
    table.insert(1, vec!["no_critical_errors".into(), "summary_present".into()]);
    table.insert(2, vec!["no_critical_errors".into(), "artifacts_present".into()]);
    table.insert(
        3,
        vec![
            "no_critical_errors".into(),
            "stage_succeeded".into(),
            "artifacts_present".into(),
        ],
    );
    table.insert(4, vec!["no_critical_errors".into(), "stage_succeeded".into()]);
    table.insert(5, vec!["no_critical_errors".into(), "stage_succeeded".into()]);
    table.insert(6, vec!["no_critical_errors".into(), "artifacts_present".into()]);
    table
}

/// Resolve the effective config for a gate key.
///
/// A project override for the key fully replaces the default entry — fields
/// are never merged. Keys with neither an override nor a default get a
/// permissive baseline.
pub fn resolve_gate_config(
    key: &str,
    defaults: &HashMap<String, GateConfig>,
    overrides: &HashMap<String, GateConfig>,
) -> GateConfig {
    overrides
        .get(key)
        .or_else(|| defaults.get(key))
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_key_format() {
        assert_eq!(gate_key(3, 4), "stage3_to_stage4");
        assert_eq!(gate_key(10, 11), "stage10_to_stage11");
    }

    #[test]
    fn default_table_has_at_least_two_named_gates() {
        let table = default_gate_table();
        assert!(table.len() >= 2);
        assert!(table.contains_key("stage3_to_stage4"));
        assert!(table.contains_key("stage5_to_stage6"));
    }

    #[test]
    fn override_replaces_default_entry_wholesale() {
        let defaults = default_gate_table();
        let mut overrides = HashMap::new();
        // Override sets only min_score; blocking must fall back to the
        // struct default (false), NOT to the built-in entry's true.
        overrides.insert(
            gate_key(3, 4),
            GateConfig {
                min_score: Some(2.0),
                ..Default::default()
            },
        );

        let resolved = resolve_gate_config("stage3_to_stage4", &defaults, &overrides);
        assert_eq!(resolved.min_score, Some(2.0));
        assert!(!resolved.blocking);
        assert_eq!(resolved.require_tests, None);
    }

    #[test]
    fn unknown_key_resolves_to_permissive_baseline() {
        let defaults = default_gate_table();
        let overrides = HashMap::new();
        let resolved = resolve_gate_config("stage1_to_stage2", &defaults, &overrides);
        assert_eq!(resolved, GateConfig::default());
        assert!(!resolved.blocking);
    }

    #[test]
    fn default_falls_through_when_no_override() {
        let defaults = default_gate_table();
        let overrides = HashMap::new();
        let resolved = resolve_gate_config("stage5_to_stage6", &defaults, &overrides);
        assert!(resolved.blocking);
        assert_eq!(resolved.min_test_coverage, Some(70.0));
    }

    #[test]
    fn unknown_stage_has_no_default_checks() {
        let checks = default_stage_checks();
        assert!(checks.get(&99).is_none());
    }

    #[test]
    fn gate_config_toml_roundtrip() {
        let toml_src = r#"
blocking = true
min_score = 3.5
checks = ["no_critical_errors"]
allow_minor_issues = false
"#;
        let cfg: GateConfig = toml::from_str(toml_src).unwrap();
        assert!(cfg.blocking);
        assert_eq!(cfg.min_score, Some(3.5));
        assert_eq!(cfg.checks.as_deref(), Some(&["no_critical_errors".to_string()][..]));
        assert_eq!(cfg.allow_minor_issues, Some(false));
        assert_eq!(cfg.require_tests, None);
    }
}
