//! Pre-execution gate.
//!
//! Whatever executes plans asks the gate first. The gate works only from the
//! persisted plan, re-loaded on every call, and refuses unless:
//! - a write plan has an approved approval request
//! - no other execution of the plan is running
//! - a write plan still hashes to the digest recorded at approval time
//! - a write plan's context and constraints match what was approved
//! - the plan's constraints hold now
//!
//! A successful check claims the plan's execution in the store, so one
//! approval authorizes exactly one run.

use crate::approval::ApprovalRequest;
use crate::audit::{AuditEvent, AuditEventKind, AuditSink, TracingAuditSink};
use crate::error::ExecutionError;
use crate::integrity::{IntegrityError, PlanDigest, verify_plan_hash};
use crate::store::PlanStore;
use chrono::{DateTime, Utc};
use opsgate_core::{ActionKind, PlanRecord, PlanStep, RiskLevel};
use opsgate_policy::{ConstraintEngine, effective_risk, risk_from_intent};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Permission to execute one plan, carrying the verified steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionTicket {
    pub plan_id: String,
    pub tenant: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    pub risk: RiskLevel,
    pub action_kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<PlanDigest>,
    pub steps: Vec<PlanStep>,
}

pub struct ExecutionGate {
    store: Arc<dyn PlanStore>,
    engine: ConstraintEngine,
    audit: Arc<dyn AuditSink>,
}

impl ExecutionGate {
    pub fn new(store: Arc<dyn PlanStore>) -> Self {
        Self {
            store,
            engine: ConstraintEngine::default(),
            audit: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_constraint_engine(mut self, engine: ConstraintEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Decide whether `plan_id` may execute at `now`.
    #[tracing::instrument(name = "execution.authorize", skip(self, now))]
    pub async fn authorize(
        &self,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ExecutionTicket, ExecutionError> {
        let payload = self
            .store
            .get_plan(plan_id)
            .await
            .map_err(ExecutionError::Store)?
            .ok_or_else(|| ExecutionError::PlanNotFound(plan_id.to_string()))?;
        let record: PlanRecord = serde_json::from_value(payload)?;

        let result = self.check(plan_id, &record, now).await;
        match &result {
            Ok(ticket) => self.audit.record(
                AuditEvent::new(AuditEventKind::ExecutionAuthorized, &ticket.tenant)
                    .plan(plan_id)
                    .risk(ticket.risk, ticket.action_kind),
            ),
            Err(e) => {
                let kind = if e.is_tampering() {
                    AuditEventKind::IntegrityViolation
                } else {
                    AuditEventKind::ExecutionRefused
                };
                self.audit.record(
                    AuditEvent::new(kind, &record.context.tenant)
                        .plan(plan_id)
                        .risk(record.risk_level, record.action_kind)
                        .detail(json!({ "error": e.to_string() })),
                );
            }
        }
        result
    }

    /// Report that the execution authorized for `plan_id` has ended.
    pub async fn complete(&self, plan_id: &str) -> Result<(), ExecutionError> {
        self.store
            .finish_execution(plan_id)
            .await
            .map_err(ExecutionError::Store)?;
        tracing::info!(plan_id, "execution finished");
        Ok(())
    }

    async fn check(
        &self,
        plan_id: &str,
        record: &PlanRecord,
        now: DateTime<Utc>,
    ) -> Result<ExecutionTicket, ExecutionError> {
        let approval = self
            .store
            .approval_for_plan(plan_id)
            .await
            .map_err(ExecutionError::Store)?;
        let stored_digest = self
            .store
            .plan_hash(plan_id)
            .await
            .map_err(ExecutionError::Store)?;

        // Recomputed from the persisted content; the stored labels alone are
        // not trusted to downgrade a plan to read.
        let risk = effective_risk(
            record.risk_level.escalate(risk_from_intent(&record.intent)),
            record.steps(),
        );
        let is_write = record.action_kind.is_write()
            || risk != RiskLevel::Read
            || stored_digest.is_some()
            || approval.is_some();
        let action_kind = if is_write {
            ActionKind::Write
        } else {
            ActionKind::Read
        };

        let approval_id = if is_write {
            Some(require_approved(plan_id, approval.as_ref())?)
        } else {
            None
        };

        if self
            .store
            .has_active_execution(plan_id)
            .await
            .map_err(ExecutionError::Store)?
        {
            return Err(ExecutionError::AlreadyExecuting(plan_id.to_string()));
        }

        let digest = if is_write {
            let digest =
                stored_digest.ok_or_else(|| ExecutionError::DigestMissing(plan_id.to_string()))?;
            verify_plan_hash(&digest, &record.intent, record.steps()).map_err(|e| match e {
                IntegrityError::Mismatch { expected, actual } => {
                    tracing::error!(
                        plan_id,
                        expected = %expected,
                        actual = %actual,
                        "plan modified after approval"
                    );
                    ExecutionError::PlanModifiedAfterApproval {
                        plan_id: plan_id.to_string(),
                    }
                }
                other => ExecutionError::Integrity(other),
            })?;
            if let Some(request) = &approval {
                if !request.scope_matches(&record.context, record.constraints.as_ref()) {
                    tracing::error!(plan_id, "plan scope changed after approval");
                    return Err(ExecutionError::PlanModifiedAfterApproval {
                        plan_id: plan_id.to_string(),
                    });
                }
            }
            Some(digest)
        } else {
            None
        };

        self.engine.enforce(
            &record.context,
            record.constraints.as_ref(),
            record.steps(),
            now,
            action_kind,
        )?;

        if !self
            .store
            .begin_execution(plan_id)
            .await
            .map_err(ExecutionError::Store)?
        {
            let active = self
                .store
                .has_active_execution(plan_id)
                .await
                .map_err(ExecutionError::Store)?;
            return Err(if active {
                ExecutionError::AlreadyExecuting(plan_id.to_string())
            } else {
                ExecutionError::AlreadyExecuted(plan_id.to_string())
            });
        }

        Ok(ExecutionTicket {
            plan_id: plan_id.to_string(),
            tenant: record.context.tenant.clone(),
            approval_id,
            risk,
            action_kind,
            digest,
            steps: record.steps().to_vec(),
        })
    }
}

fn require_approved(
    plan_id: &str,
    approval: Option<&ApprovalRequest>,
) -> Result<String, ExecutionError> {
    match approval {
        Some(request) if request.is_approved() => Ok(request.id.clone()),
        Some(request) => Err(ExecutionError::NotApproved {
            plan_id: plan_id.to_string(),
            status: request.status.to_string(),
        }),
        None => Err(ExecutionError::NotApproved {
            plan_id: plan_id.to_string(),
            status: "missing".to_string(),
        }),
    }
}
