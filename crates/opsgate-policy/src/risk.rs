//! Risk classification.
//!
//! Two independent signals produce a [`RiskLevel`]:
//! - the declared intent, matched against keyword tiers
//! - the concrete plan steps, matched against per-tool action tables
//!
//! [`effective_risk`] is the only way the two are combined. It takes the
//! maximum, so the step signal can raise the intent signal but never lower it.

use opsgate_core::{PlanStep, RiskLevel, ToolKind};

const HIGH_INTENT_KEYWORDS: &[&str] = &[
    "destroy",
    "delete",
    "terminate",
    "iam",
    "policy",
    "role",
    "user",
    "network",
    "vpc",
    "subnet",
    "security group",
    "firewall",
];

const MEDIUM_INTENT_KEYWORDS: &[&str] = &["sync", "restart", "rollout", "migrate", "upgrade"];

const LOW_INTENT_KEYWORDS: &[&str] = &["deploy", "scale", "rollback"];

const READ_VERBS: &[&str] = &["get", "list", "describe", "status", "query", "search", "show"];

/// Classify free-text intent. First matching tier in order high, medium, low.
pub fn risk_from_intent(text: &str) -> RiskLevel {
    let text = text.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

    if matches(HIGH_INTENT_KEYWORDS) {
        RiskLevel::High
    } else if matches(MEDIUM_INTENT_KEYWORDS) {
        RiskLevel::Medium
    } else if matches(LOW_INTENT_KEYWORDS) {
        RiskLevel::Low
    } else {
        RiskLevel::Read
    }
}

fn high_risk_actions(tool: ToolKind) -> &'static [&'static str] {
    match tool {
        ToolKind::Kubectl => &[
            "delete", "exec", "apply", "patch", "replace", "drain", "cordon", "taint",
        ],
        ToolKind::Helm => &["uninstall", "delete"],
        ToolKind::Aws => &[
            "delete",
            "terminate",
            "remove",
            "destroy",
            "attach-role-policy",
            "attach-user-policy",
            "attach-group-policy",
            "put-role-policy",
            "put-user-policy",
            "put-group-policy",
            "create-policy-version",
            "create-access-key",
            "update-assume-role-policy",
        ],
        ToolKind::Vault => &["delete", "revoke", "destroy"],
        ToolKind::Argocd => &["delete"],
        ToolKind::Promql | ToolKind::Traceql => &[],
    }
}

fn medium_risk_actions(tool: ToolKind) -> &'static [&'static str] {
    match tool {
        ToolKind::Kubectl => &["scale", "rollout"],
        ToolKind::Helm => &["upgrade", "install", "rollback"],
        ToolKind::Argocd => &["sync"],
        ToolKind::Aws => &["update", "modify", "put", "create", "run"],
        ToolKind::Vault | ToolKind::Promql | ToolKind::Traceql => &[],
    }
}

/// Leading verb of an action such as `describe-instances` or `get pods`.
fn leading_verb(action: &str) -> &str {
    action
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .find(|part| !part.is_empty())
        .unwrap_or("")
}

/// Classify one step. `None` when the step carries no tool or action.
pub fn risk_from_step(step: &PlanStep) -> Option<RiskLevel> {
    let tool_name = step.tool.trim();
    let action = step.action.trim().to_lowercase();
    if tool_name.is_empty() || action.is_empty() {
        return None;
    }

    if let Some(tool) = ToolKind::from_name(tool_name) {
        if high_risk_actions(tool).iter().any(|a| action.contains(a)) {
            return Some(RiskLevel::High);
        }
        if medium_risk_actions(tool).iter().any(|a| action.contains(a)) {
            return Some(RiskLevel::Medium);
        }
    }

    if READ_VERBS.contains(&leading_verb(&action)) {
        Some(RiskLevel::Read)
    } else {
        Some(RiskLevel::Low)
    }
}

/// Highest tier across all steps. A single high step short-circuits.
pub fn risk_from_steps(steps: &[PlanStep]) -> RiskLevel {
    let mut highest = RiskLevel::Read;
    for step in steps {
        match risk_from_step(step) {
            Some(RiskLevel::High) => return RiskLevel::High,
            Some(level) => highest = highest.max(level),
            None => {}
        }
    }
    highest
}

/// Escalate-only merge of the intent tier and the step tier.
///
/// Must be re-run after step generation; the intent-only tier is provisional.
pub fn effective_risk(intent_risk: RiskLevel, steps: &[PlanStep]) -> RiskLevel {
    intent_risk.escalate(risk_from_steps(steps))
}
