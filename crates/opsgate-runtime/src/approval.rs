//! Human approval records for write plans.
//!
//! Every write plan gets exactly one approval record when it is persisted.
//! The record starts `pending` and moves once to `approved`, `rejected`,
//! `cancelled` or `expired`. Expiry is lazy: a pending record past its TTL
//! is marked `expired` the next time it is read or decided.
//!
//! A request also records the plan's context and constraints as they were
//! when approval was requested. The approver signs off on that scope.

use chrono::{DateTime, Duration, Utc};
use opsgate_core::{Constraints, ContextRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Status of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Waiting for human review.
    Pending,
    /// Approved by a human.
    Approved,
    /// Rejected by a human.
    Rejected,
    /// Expired before a decision.
    Expired,
    /// Withdrawn before a decision.
    Cancelled,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
            ApprovalStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approval request for one persisted plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub plan_id: String,
    pub tenant_id: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
}

impl ApprovalRequest {
    pub fn new(
        plan_id: impl Into<String>,
        tenant_id: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self, ApprovalError> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(ApprovalError::TtlOutOfRange(ttl))?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            plan_id: plan_id.into(),
            tenant_id: tenant_id.into(),
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at,
            decided_at: None,
            decided_by: None,
            reason: None,
            context: None,
            constraints: None,
        })
    }

    /// Record the scope the approver is signing off on.
    pub fn with_scope(mut self, context: ContextRef, constraints: Option<Constraints>) -> Self {
        self.context = Some(context);
        self.constraints = constraints;
        self
    }

    /// Whether `context` and `constraints` still match the recorded scope.
    /// Requests without a recorded scope match anything.
    pub fn scope_matches(&self, context: &ContextRef, constraints: Option<&Constraints>) -> bool {
        match &self.context {
            Some(bound) => bound == context && self.constraints.as_ref() == constraints,
            None => true,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_pending(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && !self.is_expired(now)
    }

    pub fn is_approved(&self) -> bool {
        self.status == ApprovalStatus::Approved
    }

    /// Mark a pending request expired if its TTL has passed.
    /// Returns whether the status changed.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == ApprovalStatus::Pending && self.is_expired(now) {
            self.status = ApprovalStatus::Expired;
            self.decided_at = Some(now);
            return true;
        }
        false
    }

    pub fn approve(
        &mut self,
        by: impl Into<String>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        self.decide(ApprovalStatus::Approved, Some(by.into()), reason, now)
    }

    pub fn reject(
        &mut self,
        by: impl Into<String>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        self.decide(ApprovalStatus::Rejected, Some(by.into()), reason, now)
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), ApprovalError> {
        self.decide(ApprovalStatus::Cancelled, None, None, now)
    }

    fn decide(
        &mut self,
        status: ApprovalStatus,
        by: Option<String>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        if self.refresh(now) {
            return Err(ApprovalError::Expired(self.id.clone()));
        }
        if self.status != ApprovalStatus::Pending {
            return Err(ApprovalError::AlreadyDecided {
                id: self.id.clone(),
                status: self.status,
            });
        }
        self.status = status;
        self.decided_at = Some(now);
        self.decided_by = by;
        self.reason = reason;
        Ok(())
    }
}

/// Errors that can occur with approvals.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval request not found: {0}")]
    NotFound(String),

    #[error("approval request expired: {0}")]
    Expired(String),

    #[error("approval request {id} already decided ({status})")]
    AlreadyDecided { id: String, status: ApprovalStatus },

    #[error("approval ttl {0} puts expiry out of range")]
    TtlOutOfRange(Duration),

    #[error("approval storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(now: DateTime<Utc>) -> ApprovalRequest {
        ApprovalRequest::new("plan-1", "acme", now, Duration::hours(1)).unwrap()
    }

    #[test]
    fn new_request_is_pending() {
        let now = Utc::now();
        let req = request(now);
        assert_eq!(req.status, ApprovalStatus::Pending);
        assert!(req.is_pending(now));
        assert_eq!(req.expires_at - req.created_at, Duration::hours(1));
    }

    #[test]
    fn approve_records_decider() {
        let now = Utc::now();
        let mut req = request(now);
        req.approve("oncall", Some("looks good".to_string()), now)
            .unwrap();
        assert!(req.is_approved());
        assert_eq!(req.decided_by.as_deref(), Some("oncall"));
        assert_eq!(req.decided_at, Some(now));
    }

    #[test]
    fn decisions_are_final() {
        let now = Utc::now();
        let mut req = request(now);
        req.reject("oncall", None, now).unwrap();

        let err = req.approve("someone-else", None, now).unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::AlreadyDecided {
                status: ApprovalStatus::Rejected,
                ..
            }
        ));
        assert_eq!(req.status, ApprovalStatus::Rejected);
    }

    #[test]
    fn expired_request_cannot_be_approved() {
        let now = Utc::now();
        let mut req = request(now);
        let later = now + Duration::hours(2);

        let err = req.approve("oncall", None, later).unwrap_err();
        assert!(matches!(err, ApprovalError::Expired(_)));
        assert_eq!(req.status, ApprovalStatus::Expired);
    }

    #[test]
    fn unrepresentable_expiry_is_an_error() {
        let err = ApprovalRequest::new("plan-1", "acme", Utc::now(), Duration::MAX).unwrap_err();
        assert!(matches!(err, ApprovalError::TtlOutOfRange(_)));
    }

    #[test]
    fn scope_mismatch_is_detected() {
        let context = ContextRef::new("acme", "prod");
        let mut limits = Constraints::new();
        limits.insert("max_targets", serde_json::json!(1));
        let req = request(Utc::now()).with_scope(context.clone(), Some(limits.clone()));

        assert!(req.scope_matches(&context, Some(&limits)));
        assert!(!req.scope_matches(&context, None));
        assert!(!req.scope_matches(&ContextRef::new("acme", "staging"), Some(&limits)));
        assert!(request(Utc::now()).scope_matches(&context, None));
    }

    #[test]
    fn refresh_only_expires_pending() {
        let now = Utc::now();
        let mut req = request(now);
        req.approve("oncall", None, now).unwrap();
        assert!(!req.refresh(now + Duration::days(3)));
        assert!(req.is_approved());
    }
}
