//! Opsgate Policy
//!
//! Risk classification, the policy evaluator contract and constraint
//! enforcement.
//!
//! - [`risk`]: intent and step based risk tiers, merged escalate-only
//! - [`constraints`]: merging and enforcing environment, window and target limits
//! - [`PolicyEvaluator`]: the external decision point consulted by the pipeline

pub mod constraints;
pub mod error;
pub mod risk;

use async_trait::async_trait;
use opsgate_core::{ActionKind, ContextRef, PolicyConfig, RiskLevel};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use constraints::{
    ConstraintEngine, DiagnosticHints, MaintenanceWindow, WindowSpec, enforce_constraints,
    estimate_targets, merge_constraints,
};
pub use error::{ConstraintViolation, ConstraintViolationKind};
pub use risk::{effective_risk, risk_from_intent, risk_from_step, risk_from_steps};

/// A recognized policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    RequireApproval,
    Deny,
}

impl PolicyDecision {
    /// Parse a decision string. Unrecognized strings yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "allow" => Some(PolicyDecision::Allow),
            "require_approval" => Some(PolicyDecision::RequireApproval),
            "deny" => Some(PolicyDecision::Deny),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyDecision::Allow => "allow",
            PolicyDecision::RequireApproval => "require_approval",
            PolicyDecision::Deny => "deny",
        }
    }
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for a policy check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCheckInput {
    pub context: ContextRef,
    /// Resource/action name, e.g. `plan.alert`.
    pub resource_action: String,
    pub action_kind: ActionKind,
    pub risk: RiskLevel,
}

/// Policy output. `decision` is left as the raw string; the caller decides
/// what to do with values it does not recognize.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyResponse {
    pub decision: String,
    #[serde(default)]
    pub constraints: serde_json::Map<String, serde_json::Value>,
}

impl PolicyResponse {
    pub fn new(decision: impl Into<String>) -> Self {
        Self {
            decision: decision.into(),
            constraints: serde_json::Map::new(),
        }
    }

    pub fn with_constraints(mut self, constraints: serde_json::Map<String, serde_json::Value>) -> Self {
        self.constraints = constraints;
        self
    }
}

/// External policy decision point.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn decide(&self, input: PolicyCheckInput) -> anyhow::Result<PolicyResponse>;
}

/// Config-driven policy evaluator.
///
/// Denies anything at or above `deny_at_or_above`, otherwise returns the
/// decision configured for the environment. Every response carries the
/// configured constraints.
pub struct StaticPolicy {
    config: PolicyConfig,
}

impl StaticPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }
}

impl Default for StaticPolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

#[async_trait]
impl PolicyEvaluator for StaticPolicy {
    async fn decide(&self, input: PolicyCheckInput) -> anyhow::Result<PolicyResponse> {
        let decision = match self.config.deny_at_or_above {
            Some(threshold) if input.risk >= threshold => PolicyDecision::Deny.as_str(),
            _ => self.config.decision_for(&input.context.environment),
        };

        tracing::debug!(
            tenant = %input.context.tenant,
            environment = %input.context.environment,
            action = %input.resource_action,
            risk = %input.risk,
            decision = %decision,
            "static policy decision"
        );

        Ok(PolicyResponse::new(decision).with_constraints(self.config.constraints.clone()))
    }
}

/// Allow-all policy evaluator. Only for development and tests.
pub struct AllowAllPolicy;

#[async_trait]
impl PolicyEvaluator for AllowAllPolicy {
    async fn decide(&self, _input: PolicyCheckInput) -> anyhow::Result<PolicyResponse> {
        Ok(PolicyResponse::new(PolicyDecision::Allow.as_str()))
    }
}
