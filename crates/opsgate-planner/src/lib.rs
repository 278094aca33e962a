//! Planner contract.
//!
//! The planner is an external, LLM-backed collaborator that turns an intent
//! into free-form text. Its output is untrusted: [`parser::parse_plan_steps`]
//! extracts whatever registered-tool steps it can and drops the rest.

pub mod parser;

use async_trait::async_trait;
use opsgate_core::{
    ActionKind, Constraints, ContextRef, Evidence, RiskLevel, ToolKind, TriggerKind,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use parser::parse_plan_steps;

/// What the planner is told about the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningContext {
    pub trigger_kind: TriggerKind,
    pub summary: String,
    pub context: ContextRef,
    pub risk: RiskLevel,
    pub action_kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
    /// Tools a step may use. Anything else is dropped by the parser.
    pub allowed_tools: Vec<String>,
    /// Labels carried by the trigger, e.g. alert labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl PlanningContext {
    pub fn registered_tools() -> Vec<String> {
        ToolKind::ALL.iter().map(|t| t.name().to_string()).collect()
    }
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        intent: &str,
        context: &PlanningContext,
        evidence: &[Evidence],
    ) -> anyhow::Result<String>;
}

/// Stub planner: returns a narrative with no steps.
pub struct NoopPlanner;

#[async_trait]
impl Planner for NoopPlanner {
    async fn plan(
        &self,
        intent: &str,
        _context: &PlanningContext,
        _evidence: &[Evidence],
    ) -> anyhow::Result<String> {
        Ok(format!(
            "LLM planner not configured; no steps proposed for: {}",
            intent
        ))
    }
}

/// Planner that always returns the same text. Useful for replaying a
/// recorded planner response.
pub struct StaticPlanner {
    response: String,
}

impl StaticPlanner {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(
        &self,
        _intent: &str,
        _context: &PlanningContext,
        _evidence: &[Evidence],
    ) -> anyhow::Result<String> {
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planning_context() -> PlanningContext {
        PlanningContext {
            trigger_kind: TriggerKind::Alert,
            summary: "Alert X".to_string(),
            context: ContextRef::new("acme", "prod"),
            risk: RiskLevel::Low,
            action_kind: ActionKind::Write,
            constraints: None,
            allowed_tools: PlanningContext::registered_tools(),
            labels: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn noop_planner_yields_no_steps() {
        let text = NoopPlanner
            .plan("scale api", &planning_context(), &[])
            .await
            .unwrap();
        assert!(text.contains("not configured"));
        assert!(parse_plan_steps(&text).is_empty());
    }

    #[tokio::test]
    async fn static_planner_replays_response() {
        let planner = StaticPlanner::new(r#"[{"tool": "helm", "action": "rollback"}]"#);
        let text = planner.plan("rollback", &planning_context(), &[]).await.unwrap();
        assert_eq!(parse_plan_steps(&text).len(), 1);
    }

    #[test]
    fn registered_tools_are_listed() {
        let tools = PlanningContext::registered_tools();
        assert!(tools.contains(&"kubectl".to_string()));
        assert_eq!(tools.len(), ToolKind::ALL.len());
    }
}
