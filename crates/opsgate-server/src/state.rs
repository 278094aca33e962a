use opsgate_core::GateConfig;
use opsgate_planner::NoopPlanner;
use opsgate_policy::{ConstraintEngine, StaticPolicy};
use opsgate_runtime::{ExecutionGate, HintedQueries, InMemoryPlanStore, TrustPipeline};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared application state.
///
/// Plans and approvals live in memory; restarting the server drops them.
pub struct AppState {
    pub pipeline: TrustPipeline,
    pub gate: ExecutionGate,
    pub store: Arc<InMemoryPlanStore>,
    /// Fired on shutdown so in-flight pipeline runs stop at the next
    /// collaborator call.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn from_config(cfg: &GateConfig) -> Self {
        let store = Arc::new(InMemoryPlanStore::new(cfg.approvals.ttl()));
        let engine = ConstraintEngine::new(&cfg.constraints);

        if cfg.approvals.auto_approve_low {
            tracing::info!("approvals.auto_approve_low is set; it never applies to generated plans");
        }

        let pipeline = TrustPipeline::new(Arc::new(StaticPolicy::new(cfg.policy.clone())))
            .with_store(store.clone())
            .with_planner(Arc::new(NoopPlanner))
            .with_diagnostics(Arc::new(HintedQueries))
            .with_constraint_engine(engine)
            .with_config(cfg.pipeline.clone());

        let gate = ExecutionGate::new(store.clone()).with_constraint_engine(engine);

        Self {
            pipeline,
            gate,
            store,
            shutdown: CancellationToken::new(),
        }
    }
}
