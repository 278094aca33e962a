use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// Configuration types shared across all Opsgate crates
pub mod config;
pub mod tools;

pub use config::{
    ApprovalsConfig, ConfigError, ConstraintsConfig, GateConfig, PipelineConfig, PolicyConfig,
    ServerConfig,
};
pub use tools::ToolKind;

/// Operating scope of an action.
///
/// Built once per trigger and passed by value through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRef {
    pub tenant: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observability_project: Option<String>,
}

impl ContextRef {
    pub fn new(tenant: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            environment: environment.into(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Checks the invariants required before any policy or planning call.
    pub fn validate(&self) -> Result<(), String> {
        if self.tenant.trim().is_empty() {
            return Err("context is missing a tenant identifier".to_string());
        }
        Ok(())
    }
}

/// Risk tier. Ordered `read < low < medium < high`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Read,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Read => "read",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    /// Escalate-only merge of two tiers.
    pub fn escalate(self, other: RiskLevel) -> RiskLevel {
        self.max(other)
    }

    /// `read` is the only tier that maps to a read action.
    pub fn action_kind(&self) -> ActionKind {
        match self {
            RiskLevel::Read => ActionKind::Read,
            _ => ActionKind::Write,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an action only observes or may mutate infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Read,
    Write,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Read => "read",
            ActionKind::Write => "write",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, ActionKind::Write)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage marker of a plan step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Read,
    #[default]
    Act,
    Verify,
}

impl Stage {
    /// Parses a stage marker. Blank and unknown markers fall back to `act`.
    pub fn parse_lenient(raw: &str) -> Stage {
        match raw.trim().to_ascii_lowercase().as_str() {
            "read" => Stage::Read,
            "verify" => Stage::Verify,
            _ => Stage::Act,
        }
    }
}

/// One unit of work in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(default)]
    pub stage: Stage,
    pub action: String,
    pub tool: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preconditions: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<serde_json::Value>,
}

impl PlanStep {
    pub fn new(
        stage: Stage,
        tool: impl Into<String>,
        action: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            stage,
            action: action.into(),
            tool: tool.into(),
            input,
            preconditions: None,
            rollback: None,
        }
    }
}

/// Open key/value constraint map.
///
/// Typed accessors for the recognized keys live in `opsgate-policy`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Constraints(serde_json::Map<String, serde_json::Value>);

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// What started a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Alert,
    Schedule,
    Adhoc,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Alert => "alert",
            TriggerKind::Schedule => "schedule",
            TriggerKind::Adhoc => "adhoc",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request-supplied constraints as they arrive from a trigger source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawConstraints {
    /// Already-decoded map.
    Map(serde_json::Map<String, serde_json::Value>),
    /// Encoded JSON bytes (e.g. a stored column or a queue payload).
    Encoded(Vec<u8>),
}

impl From<serde_json::Map<String, serde_json::Value>> for RawConstraints {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        RawConstraints::Map(map)
    }
}

impl From<Vec<u8>> for RawConstraints {
    fn from(bytes: Vec<u8>) -> Self {
        RawConstraints::Encoded(bytes)
    }
}

/// A trigger event handed to the pipeline by an alert poller, scheduler, or
/// an ad-hoc request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    /// Alert name or schedule name.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub summary: String,
    /// Explicit intent. When absent the pipeline derives one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    pub context: ContextRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<RawConstraints>,
    /// Free-form labels, e.g. alert labels. Passed through to the planner.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl TriggerEvent {
    pub fn alert(name: impl Into<String>, summary: impl Into<String>, context: ContextRef) -> Self {
        Self {
            kind: TriggerKind::Alert,
            name: name.into(),
            summary: summary.into(),
            intent: None,
            context,
            constraints: None,
            labels: BTreeMap::new(),
        }
    }

    pub fn schedule(
        name: impl Into<String>,
        summary: impl Into<String>,
        context: ContextRef,
    ) -> Self {
        Self {
            kind: TriggerKind::Schedule,
            ..Self::alert(name, summary, context)
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn with_constraints(mut self, constraints: impl Into<RawConstraints>) -> Self {
        self.constraints = Some(constraints.into());
        self
    }

    /// Human-readable summary for the plan record.
    pub fn derived_summary(&self) -> String {
        let summary = self.summary.trim();
        let name = self.name.trim();
        match self.kind {
            TriggerKind::Alert if !name.is_empty() && !summary.is_empty() => {
                format!("Alert {name}: {summary}")
            }
            TriggerKind::Alert if !name.is_empty() => format!("Alert {name} firing"),
            TriggerKind::Schedule if !name.is_empty() && !summary.is_empty() => {
                format!("Scheduled {name}: {summary}")
            }
            _ => summary.to_string(),
        }
    }

    /// Intent used for risk classification and planning.
    ///
    /// An explicit intent wins. Alerts otherwise become an investigation of
    /// the alert; schedules and ad-hoc requests use their summary.
    pub fn derived_intent(&self) -> String {
        if let Some(intent) = self.intent.as_deref().map(str::trim) {
            if !intent.is_empty() {
                return intent.to_string();
            }
        }
        let summary = self.summary.trim();
        match self.kind {
            TriggerKind::Alert => {
                let name = self.name.trim();
                match (name.is_empty(), summary.is_empty()) {
                    (false, false) => format!("investigate alert {name}: {summary}"),
                    (false, true) => format!("investigate alert {name}"),
                    (true, false) => format!("investigate alert: {summary}"),
                    (true, true) => String::new(),
                }
            }
            TriggerKind::Schedule | TriggerKind::Adhoc => summary.to_string(),
        }
    }
}

/// A piece of diagnostic evidence gathered before planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(rename = "type")]
    pub kind: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl Evidence {
    pub fn query(kind: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            query: query.into(),
            result_ref: None,
            link: None,
        }
    }
}

/// The persisted plan artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub trigger_kind: TriggerKind,
    pub summary: String,
    pub context: ContextRef,
    pub risk_level: RiskLevel,
    pub action_kind: ActionKind,
    pub intent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
    /// UTC timestamp (RFC3339).
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<PlanStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Vec<Evidence>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    /// Advisory constraint violation found at generation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint_violation: Option<String>,
}

impl PlanRecord {
    pub fn steps(&self) -> &[PlanStep] {
        self.steps.as_deref().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn risk_levels_are_totally_ordered() {
        assert!(RiskLevel::Read < RiskLevel::Low);
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert_eq!(RiskLevel::Low.escalate(RiskLevel::High), RiskLevel::High);
        assert_eq!(RiskLevel::High.escalate(RiskLevel::Read), RiskLevel::High);
    }

    #[test]
    fn only_read_risk_maps_to_read_action() {
        assert_eq!(RiskLevel::Read.action_kind(), ActionKind::Read);
        assert_eq!(RiskLevel::Low.action_kind(), ActionKind::Write);
        assert_eq!(RiskLevel::High.action_kind(), ActionKind::Write);
    }

    #[test]
    fn context_requires_tenant() {
        assert!(ContextRef::new("", "prod").validate().is_err());
        assert!(ContextRef::new("   ", "prod").validate().is_err());
        assert!(ContextRef::new("acme", "prod").validate().is_ok());
    }

    #[test]
    fn plan_step_defaults_stage_to_act() {
        let step: PlanStep =
            serde_json::from_value(json!({"action": "scale", "tool": "kubectl"})).unwrap();
        assert_eq!(step.stage, Stage::Act);
        assert_eq!(step.input, serde_json::Value::Null);
    }

    #[test]
    fn lenient_stage_parsing() {
        assert_eq!(Stage::parse_lenient("VERIFY"), Stage::Verify);
        assert_eq!(Stage::parse_lenient(" read "), Stage::Read);
        assert_eq!(Stage::parse_lenient(""), Stage::Act);
        assert_eq!(Stage::parse_lenient("observe"), Stage::Act);
    }

    #[test]
    fn alert_intent_is_derived_from_name_and_summary() {
        let event = TriggerEvent::alert(
            "HighErrorRate",
            "5xx above 2% on checkout",
            ContextRef::new("acme", "prod"),
        );
        assert_eq!(
            event.derived_intent(),
            "investigate alert HighErrorRate: 5xx above 2% on checkout"
        );
        assert_eq!(
            event.derived_summary(),
            "Alert HighErrorRate: 5xx above 2% on checkout"
        );

        let explicit = event.with_intent("restart checkout pods");
        assert_eq!(explicit.derived_intent(), "restart checkout pods");
    }

    #[test]
    fn schedule_intent_uses_summary() {
        let event = TriggerEvent::schedule(
            "nightly-sync",
            "sync payments application",
            ContextRef::new("acme", "staging"),
        );
        assert_eq!(event.derived_intent(), "sync payments application");
        assert_eq!(
            event.derived_summary(),
            "Scheduled nightly-sync: sync payments application"
        );
    }

    #[test]
    fn raw_constraints_deserialize_from_map_or_bytes() {
        let map: RawConstraints = serde_json::from_value(json!({"max_targets": 5})).unwrap();
        assert!(matches!(map, RawConstraints::Map(_)));

        let bytes: RawConstraints = serde_json::from_value(json!([123, 125])).unwrap();
        assert_eq!(bytes, RawConstraints::Encoded(b"{}".to_vec()));
    }

    #[test]
    fn plan_record_round_trips() {
        let record = PlanRecord {
            trigger_kind: TriggerKind::Alert,
            summary: "Alert X".to_string(),
            context: ContextRef::new("acme", "prod").with_namespace("payments"),
            risk_level: RiskLevel::Medium,
            action_kind: ActionKind::Write,
            intent: "restart payments".to_string(),
            constraints: None,
            created_at: chrono::Utc::now(),
            steps: Some(vec![PlanStep::new(
                Stage::Act,
                "kubectl",
                "rollout restart",
                json!({"name": "payments"}),
            )]),
            evidence: None,
            narrative: None,
            constraint_violation: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        let back: PlanRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
