//! Audit trail for trust decisions.
//!
//! Policy denials, plan creation, approval requests and every execution-gate
//! verdict are emitted as [`AuditEvent`]s through an [`AuditSink`].

use chrono::{DateTime, Utc};
use opsgate_core::{ActionKind, RiskLevel};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    PolicyDenied,
    PlanCreated,
    ApprovalRequested,
    ExecutionAuthorized,
    ExecutionRefused,
    IntegrityViolation,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::PolicyDenied => "policy_denied",
            AuditEventKind::PlanCreated => "plan_created",
            AuditEventKind::ApprovalRequested => "approval_requested",
            AuditEventKind::ExecutionAuthorized => "execution_authorized",
            AuditEventKind::ExecutionRefused => "execution_refused",
            AuditEventKind::IntegrityViolation => "integrity_violation",
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub tenant: String,
    pub plan_id: Option<String>,
    pub approval_id: Option<String>,
    pub risk: Option<RiskLevel>,
    pub action_kind: Option<ActionKind>,
    pub detail: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, tenant: impl Into<String>) -> Self {
        Self {
            kind,
            tenant: tenant.into(),
            plan_id: None,
            approval_id: None,
            risk: None,
            action_kind: None,
            detail: serde_json::Value::Null,
            at: Utc::now(),
        }
    }

    pub fn plan(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self
    }

    pub fn approval(mut self, approval_id: impl Into<String>) -> Self {
        self.approval_id = Some(approval_id.into());
        self
    }

    pub fn risk(mut self, risk: RiskLevel, action_kind: ActionKind) -> Self {
        self.risk = Some(risk);
        self.action_kind = Some(action_kind);
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Trait boundary for audit storage. Recording never fails the caller.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits audit events as structured tracing events on the `audit` target.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let risk = event.risk.map(|r| r.as_str()).unwrap_or("-");
        let action_kind = event.action_kind.map(|a| a.as_str()).unwrap_or("-");
        let plan_id = event.plan_id.as_deref().unwrap_or("-");
        let approval_id = event.approval_id.as_deref().unwrap_or("-");

        match event.kind {
            AuditEventKind::IntegrityViolation
            | AuditEventKind::ExecutionRefused
            | AuditEventKind::PolicyDenied => tracing::warn!(
                target: "audit",
                kind = %event.kind,
                tenant = %event.tenant,
                plan_id,
                approval_id,
                risk,
                action_kind,
                detail = %event.detail,
                "audit event"
            ),
            _ => tracing::info!(
                target: "audit",
                kind = %event.kind,
                tenant = %event.tenant,
                plan_id,
                approval_id,
                risk,
                action_kind,
                detail = %event.detail,
                "audit event"
            ),
        }
    }
}

/// Keeps events in memory. Used by tests and local tooling.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<AuditEventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemoryAuditSink::default();
        sink.record(AuditEvent::new(AuditEventKind::PlanCreated, "acme").plan("p1"));
        sink.record(
            AuditEvent::new(AuditEventKind::ApprovalRequested, "acme")
                .plan("p1")
                .approval("a1")
                .risk(RiskLevel::High, ActionKind::Write),
        );

        assert_eq!(
            sink.kinds(),
            vec![AuditEventKind::PlanCreated, AuditEventKind::ApprovalRequested]
        );
        let events = sink.events();
        assert_eq!(events[1].approval_id.as_deref(), Some("a1"));
        assert_eq!(events[1].risk, Some(RiskLevel::High));
    }

    #[test]
    fn kinds_serialize_snake_case() {
        let value = serde_json::to_value(AuditEventKind::IntegrityViolation).unwrap();
        assert_eq!(value, serde_json::json!("integrity_violation"));
    }
}
