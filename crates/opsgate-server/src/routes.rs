//! HTTP routes.
//!
//! - `GET  /healthz`
//! - `POST /v1/triggers`: run the pipeline for one trigger event
//! - `GET  /v1/plans/{id}`: the persisted plan
//! - `POST /v1/plans/{id}/authorize`: pre-execution check, claims the run
//! - `POST /v1/plans/{id}/complete`: the authorized run has ended
//! - `POST /v1/approvals/{id}/approve` and `/reject`: human decision
//! - `POST /v1/approvals/{id}/cancel`: withdraw a pending request

use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use opsgate_core::TriggerEvent;
use opsgate_runtime::{ApprovalError, ExecutionError, PipelineError, PlanStore};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/triggers", post(submit_trigger))
        .route("/v1/plans/{id}", get(get_plan))
        .route("/v1/plans/{id}/authorize", post(authorize_plan))
        .route("/v1/plans/{id}/complete", post(complete_plan))
        .route("/v1/approvals/{id}/approve", post(approve))
        .route("/v1/approvals/{id}/reject", post(reject))
        .route("/v1/approvals/{id}/cancel", post(cancel))
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true, "service": "opsgate-server" }))
}

async fn submit_trigger(
    State(state): State<Arc<AppState>>,
    Json(event): Json<TriggerEvent>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let outcome = state.pipeline.run(&event, &state.shutdown).await?;
    Ok((StatusCode::CREATED, Json(json!(outcome))))
}

async fn get_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.store.get_plan(&id).await {
        Ok(Some(plan)) => Ok(Json(plan)),
        Ok(None) => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "plan_not_found",
            format!("plan not found: {id}"),
        )),
        Err(e) => Err(ApiError::internal(e)),
    }
}

async fn authorize_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let ticket = state.gate.authorize(&id, chrono::Utc::now()).await?;
    Ok(Json(json!(ticket)))
}

async fn complete_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.gate.complete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct DecisionBody {
    by: String,
    #[serde(default)]
    reason: Option<String>,
}

async fn approve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<Value>, ApiError> {
    let request = state.store.approve(&id, body.by, body.reason)?;
    Ok(Json(json!(request)))
}

async fn reject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<Value>, ApiError> {
    let request = state.store.reject(&id, body.by, body.reason)?;
    Ok(Json(json!(request)))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let request = state.store.cancel(&id)?;
    Ok(Json(json!(request)))
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": { "code": self.code, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let (status, code) = match &err {
            PipelineError::StoreUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
            PipelineError::InvalidContext(_) => (StatusCode::BAD_REQUEST, "invalid_context"),
            PipelineError::PolicyDenied { .. } => (StatusCode::FORBIDDEN, "policy_denied"),
            PipelineError::ApprovalUnavailableForRead => {
                (StatusCode::CONFLICT, "approval_unavailable_for_read")
            }
            PipelineError::Policy(_) => (StatusCode::BAD_GATEWAY, "policy_unavailable"),
            PipelineError::Planner(_) => (StatusCode::BAD_GATEWAY, "planner_failed"),
            PipelineError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
            PipelineError::Serialization(_)
            | PipelineError::Store(_)
            | PipelineError::Integrity(_) => return ApiError::internal(err),
        };
        ApiError::new(status, code, err.to_string())
    }
}

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        let (status, code) = match &err {
            ExecutionError::PlanNotFound(_) => (StatusCode::NOT_FOUND, "plan_not_found"),
            ExecutionError::NotApproved { .. } => (StatusCode::FORBIDDEN, "not_approved"),
            ExecutionError::AlreadyExecuting(_) => (StatusCode::CONFLICT, "already_executing"),
            ExecutionError::AlreadyExecuted(_) => (StatusCode::CONFLICT, "already_executed"),
            ExecutionError::DigestMissing(_) => (StatusCode::CONFLICT, "digest_missing"),
            ExecutionError::PlanModifiedAfterApproval { .. } => {
                (StatusCode::CONFLICT, "plan_modified_after_approval")
            }
            ExecutionError::ConstraintViolated(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "constraint_violated")
            }
            ExecutionError::Integrity(_)
            | ExecutionError::Serialization(_)
            | ExecutionError::Store(_) => return ApiError::internal(err),
        };
        ApiError::new(status, code, err.to_string())
    }
}

impl From<ApprovalError> for ApiError {
    fn from(err: ApprovalError) -> Self {
        let (status, code) = match &err {
            ApprovalError::NotFound(_) => (StatusCode::NOT_FOUND, "approval_not_found"),
            ApprovalError::Expired(_) => (StatusCode::GONE, "approval_expired"),
            ApprovalError::AlreadyDecided { .. } => (StatusCode::CONFLICT, "already_decided"),
            ApprovalError::TtlOutOfRange(_) | ApprovalError::Storage(_) => {
                return ApiError::internal(err);
            }
        };
        ApiError::new(status, code, err.to_string())
    }
}
