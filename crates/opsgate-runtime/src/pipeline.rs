//! The trust pipeline.
//!
//! One run takes a trigger event to a persisted plan and, for anything that
//! can change infrastructure, a pending approval request. The pipeline never
//! executes a plan and never produces an execution id.
//!
//! Order of a run: validate, classify the intent, ask policy, merge
//! constraints, gather evidence, plan, parse and backfill, re-classify from
//! the steps, persist, gate.

use crate::audit::{AuditEvent, AuditEventKind, AuditSink, TracingAuditSink};
use crate::diagnostics::{DiagnosticsCollector, TopologyLookup};
use crate::error::PipelineError;
use crate::integrity::compute_plan_hash;
use crate::store::PlanStore;
use chrono::{DateTime, Utc};
use opsgate_core::{
    ActionKind, ContextRef, PipelineConfig, PlanRecord, PlanStep, RiskLevel, Stage, ToolKind,
    TriggerEvent,
};
use opsgate_planner::{Planner, PlanningContext, parse_plan_steps};
use opsgate_policy::{
    ConstraintEngine, DiagnosticHints, PolicyCheckInput, PolicyDecision, PolicyEvaluator,
    effective_risk, merge_constraints, risk_from_intent,
};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
    pub plan_id: String,
    /// Present exactly when the plan is a write plan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    pub risk: RiskLevel,
    pub action_kind: ActionKind,
    pub step_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint_violation: Option<String>,
}

impl PipelineOutcome {
    pub fn awaiting_approval(&self) -> bool {
        self.approval_id.is_some()
    }
}

pub struct TrustPipeline {
    store: Option<Arc<dyn PlanStore>>,
    policy: Arc<dyn PolicyEvaluator>,
    planner: Option<Arc<dyn Planner>>,
    diagnostics: Option<Arc<dyn DiagnosticsCollector>>,
    topology: Option<Arc<dyn TopologyLookup>>,
    audit: Arc<dyn AuditSink>,
    engine: ConstraintEngine,
    config: PipelineConfig,
}

impl TrustPipeline {
    pub fn new(policy: Arc<dyn PolicyEvaluator>) -> Self {
        Self {
            store: None,
            policy,
            planner: None,
            diagnostics: None,
            topology: None,
            audit: Arc::new(TracingAuditSink),
            engine: ConstraintEngine::default(),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn PlanStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsCollector>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn with_topology(mut self, topology: Arc<dyn TopologyLookup>) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_constraint_engine(mut self, engine: ConstraintEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the pipeline for one trigger event.
    pub async fn run(
        &self,
        event: &TriggerEvent,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        self.run_at(event, Utc::now(), cancel).await
    }

    /// Run with an explicit clock for the advisory constraint check.
    #[tracing::instrument(
        name = "pipeline.run",
        skip_all,
        fields(tenant = %event.context.tenant, trigger = %event.kind)
    )]
    pub async fn run_at(
        &self,
        event: &TriggerEvent,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        // Validate
        let store = self.store.as_ref().ok_or(PipelineError::StoreUnavailable)?;
        event
            .context
            .validate()
            .map_err(PipelineError::InvalidContext)?;
        let context = event.context.clone();

        // Classify the intent
        let summary = event.derived_summary();
        let intent = event.derived_intent();
        let intent_risk = risk_from_intent(&intent);
        let mut action_kind = intent_risk.action_kind();
        tracing::debug!(risk = %intent_risk, action_kind = %action_kind, "classified intent");

        // Policy decision
        let response = until_cancelled(
            cancel,
            self.policy.decide(PolicyCheckInput {
                context: context.clone(),
                resource_action: format!("plan.{}", event.kind),
                action_kind,
                risk: intent_risk,
            }),
        )
        .await
        .ok_or(PipelineError::Cancelled)?
        .map_err(PipelineError::Policy)?;

        match PolicyDecision::parse(&response.decision) {
            Some(PolicyDecision::Allow) => {}
            Some(PolicyDecision::RequireApproval) if action_kind.is_write() => {}
            Some(PolicyDecision::RequireApproval) => {
                self.audit.record(
                    AuditEvent::new(AuditEventKind::PolicyDenied, &context.tenant)
                        .risk(intent_risk, action_kind)
                        .detail(json!({
                            "decision": response.decision,
                            "reason": "approval required for a read-only trigger",
                        })),
                );
                return Err(PipelineError::ApprovalUnavailableForRead);
            }
            Some(PolicyDecision::Deny) | None => {
                self.audit.record(
                    AuditEvent::new(AuditEventKind::PolicyDenied, &context.tenant)
                        .risk(intent_risk, action_kind)
                        .detail(json!({ "decision": response.decision })),
                );
                return Err(PipelineError::PolicyDenied {
                    decision: response.decision,
                });
            }
        }

        // Constrain
        let mut constraints = merge_constraints(event.constraints.as_ref(), &response.constraints);
        if let Some(topology) = &self.topology {
            let graph = best_effort(
                cancel,
                self.config.topology_timeout(),
                "topology",
                topology.graph(&context),
            )
            .await;
            if let Some(graph) = graph {
                let seeded = graph.diagnostic_hints();
                if !seeded.is_empty() {
                    let mut hints = DiagnosticHints::from_constraints(constraints.as_ref());
                    hints.extend(seeded);
                    constraints = hints.apply_to(constraints);
                }
            }
        }

        // Diagnose
        let evidence = match &self.diagnostics {
            Some(diagnostics) => best_effort(
                cancel,
                self.config.diagnostics_timeout(),
                "diagnostics",
                diagnostics.collect(&context, &intent, constraints.as_ref()),
            )
            .await
            .unwrap_or_default(),
            None => Vec::new(),
        };

        // Plan
        let narrative = match &self.planner {
            Some(planner) if !intent.trim().is_empty() => {
                let planning = PlanningContext {
                    trigger_kind: event.kind,
                    summary: summary.clone(),
                    context: context.clone(),
                    risk: intent_risk,
                    action_kind,
                    constraints: constraints.clone(),
                    allowed_tools: PlanningContext::registered_tools(),
                    labels: event.labels.clone(),
                };
                let text = until_cancelled(cancel, planner.plan(&intent, &planning, &evidence))
                    .await
                    .ok_or(PipelineError::Cancelled)?
                    .map_err(PipelineError::Planner)?;
                Some(text)
            }
            _ => None,
        };

        // Parse and re-classify from the steps
        let mut steps = narrative
            .as_deref()
            .map(parse_plan_steps)
            .unwrap_or_default();
        let risk = effective_risk(intent_risk, &steps);
        if risk != RiskLevel::Read {
            action_kind = ActionKind::Write;
        }
        if action_kind.is_write() && !steps.iter().any(|s| s.stage == Stage::Verify) {
            steps.push(default_verify_step(&context));
        }
        if risk > intent_risk {
            tracing::info!(from = %intent_risk, to = %risk, "plan steps escalated risk");
        }

        // Advisory constraint check; binding enforcement happens before execution
        let constraint_violation =
            match self
                .engine
                .enforce(&context, constraints.as_ref(), &steps, now, action_kind)
            {
                Ok(()) => None,
                Err(violation) => {
                    tracing::warn!(reason = %violation.reason, "plan violates constraints");
                    Some(violation.reason)
                }
            };

        // Persist
        let record = PlanRecord {
            trigger_kind: event.kind,
            summary,
            context,
            risk_level: risk,
            action_kind,
            intent,
            constraints,
            created_at: now,
            steps: (!steps.is_empty()).then_some(steps),
            evidence: (!evidence.is_empty()).then_some(evidence),
            narrative,
            constraint_violation,
        };
        let payload = serde_json::to_value(&record)?;
        let plan_id = until_cancelled(cancel, store.create_plan(payload))
            .await
            .ok_or(PipelineError::Cancelled)?
            .map_err(PipelineError::Store)?;
        self.audit.record(
            AuditEvent::new(AuditEventKind::PlanCreated, &record.context.tenant)
                .plan(&plan_id)
                .risk(risk, action_kind),
        );

        // Gate. Once persisted, a write plan always gets its digest and
        // approval request; cancellation is no longer observed.
        let approval_id = if action_kind.is_write() {
            let digest = compute_plan_hash(&record.intent, record.steps())?;
            store
                .save_plan_hash(&plan_id, &digest)
                .await
                .map_err(PipelineError::Store)?;
            let approval_id = store
                .create_approval(&plan_id)
                .await
                .map_err(PipelineError::Store)?;
            self.audit.record(
                AuditEvent::new(AuditEventKind::ApprovalRequested, &record.context.tenant)
                    .plan(&plan_id)
                    .approval(&approval_id)
                    .risk(risk, action_kind)
                    .detail(json!({ "digest": digest.as_str() })),
            );
            Some(approval_id)
        } else {
            None
        };

        tracing::info!(
            plan_id = %plan_id,
            risk = %risk,
            action_kind = %action_kind,
            approval = approval_id.is_some(),
            "plan created"
        );

        Ok(PipelineOutcome {
            plan_id,
            approval_id,
            risk,
            action_kind,
            step_count: record.steps().len(),
            constraint_violation: record.constraint_violation,
        })
    }
}

/// Read-only check appended to write plans that lack one.
fn default_verify_step(context: &ContextRef) -> PlanStep {
    let query = match context
        .namespace
        .as_deref()
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
    {
        Some(namespace) => format!("up{{namespace=\"{namespace}\"}}"),
        None => "up".to_string(),
    };
    PlanStep::new(
        Stage::Verify,
        ToolKind::Promql.name(),
        "query",
        json!({ "query": query }),
    )
}

async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

/// Run a collaborator call whose failure must not stop the run.
async fn best_effort<T, F>(
    cancel: &CancellationToken,
    limit: Option<Duration>,
    collaborator: &'static str,
    fut: F,
) -> Option<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let bounded = async move {
        match limit {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("timed out after {}ms", limit.as_millis())),
            },
            None => fut.await,
        }
    };

    match until_cancelled(cancel, bounded).await {
        Some(Ok(value)) => Some(value),
        Some(Err(e)) => {
            tracing::warn!(collaborator, error = %e, "continuing without collaborator result");
            None
        }
        None => {
            tracing::debug!(collaborator, "collaborator call cancelled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_step_is_scoped_to_namespace() {
        let step = default_verify_step(&ContextRef::new("acme", "prod").with_namespace("web"));
        assert_eq!(step.stage, Stage::Verify);
        assert_eq!(step.tool, "promql");
        assert_eq!(step.input, json!({"query": "up{namespace=\"web\"}"}));
        assert_eq!(opsgate_policy::risk_from_step(&step), Some(RiskLevel::Read));
    }

    #[test]
    fn verify_step_without_namespace() {
        let step = default_verify_step(&ContextRef::new("acme", "prod"));
        assert_eq!(step.input, json!({"query": "up"}));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = until_cancelled(&cancel, async { 1 }).await;
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn best_effort_swallows_errors_and_timeouts() {
        let cancel = CancellationToken::new();

        let failed: Option<u32> =
            best_effort(&cancel, None, "test", async { Err(anyhow::anyhow!("boom")) }).await;
        assert_eq!(failed, None);

        let slow: Option<u32> = best_effort(
            &cancel,
            Some(Duration::from_millis(10)),
            "test",
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            },
        )
        .await;
        assert_eq!(slow, None);

        let ok = best_effort(&cancel, None, "test", async { Ok(7) }).await;
        assert_eq!(ok, Some(7));
    }
}
