//! Shared fixtures for the runtime integration tests.
//!
//! - collaborator doubles (policy, planner, diagnostics)
//! - a pipeline wired to an in-memory store and a recording audit sink

#![allow(dead_code)]

use async_trait::async_trait;
use opsgate_core::{ContextRef, Evidence, PlanRecord, TriggerEvent};
use opsgate_planner::{Planner, PlanningContext, StaticPlanner};
use opsgate_policy::{PolicyCheckInput, PolicyEvaluator, PolicyResponse};
use opsgate_runtime::{
    DiagnosticsCollector, InMemoryPlanStore, MemoryAuditSink, PlanStore, TrustPipeline,
};
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// =============================================================================
// POLICY DOUBLES
// =============================================================================

/// Returns a fixed decision and constraint map, counting calls.
pub struct FixedPolicy {
    decision: String,
    constraints: Map<String, Value>,
    calls: AtomicUsize,
}

impl FixedPolicy {
    pub fn new(decision: &str) -> Self {
        Self {
            decision: decision.to_string(),
            constraints: Map::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_constraints(mut self, constraints: Value) -> Self {
        if let Value::Object(map) = constraints {
            self.constraints = map;
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicyEvaluator for FixedPolicy {
    async fn decide(&self, _input: PolicyCheckInput) -> anyhow::Result<PolicyResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(PolicyResponse::new(self.decision.clone()).with_constraints(self.constraints.clone()))
    }
}

// =============================================================================
// PLANNER AND DIAGNOSTICS DOUBLES
// =============================================================================

pub struct FailingPlanner;

#[async_trait]
impl Planner for FailingPlanner {
    async fn plan(
        &self,
        _intent: &str,
        _context: &PlanningContext,
        _evidence: &[Evidence],
    ) -> anyhow::Result<String> {
        anyhow::bail!("model endpoint returned 503")
    }
}

/// Answers with a fixed response and keeps every context it was given.
pub struct RecordingPlanner {
    response: String,
    seen: Mutex<Vec<PlanningContext>>,
}

impl RecordingPlanner {
    pub fn new(response: Value) -> Self {
        Self {
            response: response.to_string(),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<PlanningContext> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for RecordingPlanner {
    async fn plan(
        &self,
        _intent: &str,
        context: &PlanningContext,
        _evidence: &[Evidence],
    ) -> anyhow::Result<String> {
        self.seen.lock().unwrap().push(context.clone());
        Ok(self.response.clone())
    }
}

pub struct FailingDiagnostics;

#[async_trait]
impl DiagnosticsCollector for FailingDiagnostics {
    async fn collect(
        &self,
        _context: &ContextRef,
        _intent: &str,
        _constraints: Option<&opsgate_core::Constraints>,
    ) -> anyhow::Result<Vec<Evidence>> {
        anyhow::bail!("metrics backend unreachable")
    }
}

/// Never answers within any reasonable timeout.
pub struct SlowDiagnostics;

#[async_trait]
impl DiagnosticsCollector for SlowDiagnostics {
    async fn collect(
        &self,
        _context: &ContextRef,
        _intent: &str,
        _constraints: Option<&opsgate_core::Constraints>,
    ) -> anyhow::Result<Vec<Evidence>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(vec![Evidence::query("promql", "up")])
    }
}

// =============================================================================
// FIXTURES
// =============================================================================

pub fn prod_context() -> ContextRef {
    ContextRef::new("acme", "prod").with_namespace("web")
}

pub fn scheduled(intent: &str) -> TriggerEvent {
    TriggerEvent::schedule("manual", intent, prod_context())
}

/// Planner response proposing a single step.
pub fn one_step(tool: &str, action: &str, input: Value) -> Arc<StaticPlanner> {
    Arc::new(StaticPlanner::new(
        json!([{ "tool": tool, "action": action, "input": input }]).to_string(),
    ))
}

pub struct Harness {
    pub store: Arc<InMemoryPlanStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub pipeline: TrustPipeline,
}

impl Harness {
    pub fn new(policy: Arc<dyn PolicyEvaluator>) -> Self {
        let store = Arc::new(InMemoryPlanStore::default());
        let audit = Arc::new(MemoryAuditSink::default());
        let pipeline = TrustPipeline::new(policy)
            .with_store(store.clone())
            .with_audit(audit.clone());
        Self {
            store,
            audit,
            pipeline,
        }
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.pipeline = self.pipeline.with_planner(planner);
        self
    }

    pub async fn plan(&self, plan_id: &str) -> PlanRecord {
        let payload = self
            .store
            .get_plan(plan_id)
            .await
            .unwrap()
            .expect("plan should be persisted");
        serde_json::from_value(payload).unwrap()
    }
}
