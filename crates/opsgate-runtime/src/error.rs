//! Error types for the runtime crate.

use crate::integrity::IntegrityError;
use opsgate_policy::ConstraintViolation;
use thiserror::Error;

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No plan store is configured.
    #[error("no plan store configured")]
    StoreUnavailable,

    /// The trigger context is under-specified.
    #[error("invalid context: {0}")]
    InvalidContext(String),

    /// Policy returned `deny` or a decision the pipeline does not recognize.
    #[error("policy decision '{decision}' does not permit planning")]
    PolicyDenied { decision: String },

    /// Policy required approval for a read action, which has no approval path.
    #[error("policy requires approval for a read-only trigger; nothing to approve")]
    ApprovalUnavailableForRead,

    /// The policy evaluator failed.
    #[error("policy evaluation failed: {0:#}")]
    Policy(anyhow::Error),

    /// The planner failed.
    #[error("planner failed: {0:#}")]
    Planner(anyhow::Error),

    /// The caller cancelled the run.
    #[error("pipeline run cancelled")]
    Cancelled,

    /// Plan serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The plan store failed.
    #[error("store error: {0:#}")]
    Store(anyhow::Error),

    /// The plan digest could not be computed.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

/// Errors that refuse execution of a persisted plan.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The plan does not exist.
    #[error("plan not found: {0}")]
    PlanNotFound(String),

    /// The plan has no approval in `approved` state.
    #[error("plan {plan_id} is not approved (approval status: {status})")]
    NotApproved { plan_id: String, status: String },

    /// An execution is already running for the plan.
    #[error("plan {0} already has an active execution")]
    AlreadyExecuting(String),

    /// The plan's single execution was already authorized.
    #[error("plan {0} was already authorized for execution")]
    AlreadyExecuted(String),

    /// No integrity digest was recorded when the plan was approved.
    #[error("plan {0} has no recorded integrity digest")]
    DigestMissing(String),

    /// The persisted plan no longer matches what was approved.
    #[error("plan {plan_id} was modified after approval")]
    PlanModifiedAfterApproval { plan_id: String },

    /// A constraint does not hold at execution time.
    #[error(transparent)]
    ConstraintViolated(#[from] ConstraintViolation),

    /// The plan digest could not be computed.
    #[error(transparent)]
    Integrity(IntegrityError),

    /// The persisted plan could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The plan store failed.
    #[error("store error: {0:#}")]
    Store(anyhow::Error),
}

impl ExecutionError {
    /// Whether this is the post-approval tampering signal.
    pub fn is_tampering(&self) -> bool {
        matches!(self, ExecutionError::PlanModifiedAfterApproval { .. })
    }
}
