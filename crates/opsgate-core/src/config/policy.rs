//! Configuration for the config-driven policy evaluator.

use crate::RiskLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Decision strings understood by the pipeline.
pub const KNOWN_DECISIONS: [&str; 3] = ["allow", "require_approval", "deny"];

/// Static policy: one default decision, optional per-environment overrides
/// and a constraint map returned with every decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// "allow" | "require_approval" | "deny"
    #[serde(default = "default_decision")]
    pub default_decision: String,

    /// Deny anything at or above this risk tier.
    #[serde(default)]
    pub deny_at_or_above: Option<RiskLevel>,

    /// Decision overrides keyed by environment name (case-insensitive).
    #[serde(default)]
    pub environments: HashMap<String, String>,

    /// Constraints attached to every decision.
    #[serde(default)]
    pub constraints: serde_json::Map<String, serde_json::Value>,
}

fn default_decision() -> String {
    "require_approval".to_string()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_decision: default_decision(),
            deny_at_or_above: None,
            environments: HashMap::new(),
            constraints: serde_json::Map::new(),
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<(), String> {
        let decisions = std::iter::once(&self.default_decision).chain(self.environments.values());
        for decision in decisions {
            if !KNOWN_DECISIONS.contains(&decision.as_str()) {
                return Err(format!(
                    "unknown policy decision '{}', expected one of {:?}",
                    decision, KNOWN_DECISIONS
                ));
            }
        }
        Ok(())
    }

    /// Decision configured for an environment.
    pub fn decision_for(&self, environment: &str) -> &str {
        self.environments
            .iter()
            .find(|(env, _)| env.eq_ignore_ascii_case(environment))
            .map(|(_, decision)| decision.as_str())
            .unwrap_or(&self.default_decision)
    }
}
