//! Opsgate Runtime
//!
//! The trust pipeline that turns trigger events into persisted, risk-rated
//! plans, the integrity guard that binds an approved plan to its content, and
//! the execution gate consulted before anything runs.

pub mod approval;
pub mod audit;
pub mod diagnostics;
pub mod error;
pub mod execution;
pub mod integrity;
pub mod pipeline;
pub mod store;

pub use approval::{ApprovalError, ApprovalRequest, ApprovalStatus};
pub use audit::{AuditEvent, AuditEventKind, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use diagnostics::{
    DiagnosticsCollector, HintedQueries, NoopDiagnostics, ServiceEdge, ServiceGraph, ServiceNode,
    StaticTopology, TopologyLookup,
};
pub use error::{ExecutionError, PipelineError};
pub use execution::{ExecutionGate, ExecutionTicket};
pub use integrity::{IntegrityError, PlanDigest, compute_plan_hash, verify_plan_hash};
pub use pipeline::{PipelineOutcome, TrustPipeline};
pub use store::{InMemoryPlanStore, PlanStore};

pub use tokio_util::sync::CancellationToken;
