//! Constraint violation error.
//!
//! Every constraint failure surfaces as a single [`ConstraintViolation`]
//! carrying the kind of limit that was hit and a human-readable reason.

use thiserror::Error;

/// A constraint was violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("constraints violated: {reason}")]
pub struct ConstraintViolation {
    /// The kind of constraint that failed.
    pub kind: ConstraintViolationKind,
    /// Human-readable reason.
    pub reason: String,
}

impl ConstraintViolation {
    /// Create a new violation.
    pub fn new(kind: ConstraintViolationKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    /// The environment is not in the allow-list.
    pub fn environment_not_allowed(environment: &str, allowed: &[String]) -> Self {
        Self::new(
            ConstraintViolationKind::EnvironmentNotAllowed,
            format!(
                "environment '{}' is not allowed (allowed: {})",
                environment,
                allowed.join(", ")
            ),
        )
    }

    /// The current time is outside the maintenance window.
    pub fn outside_maintenance_window(now: &str, start: &str, end: &str, tz: &str) -> Self {
        Self::new(
            ConstraintViolationKind::OutsideMaintenanceWindow,
            format!(
                "current time {} is outside the maintenance window {}-{} ({})",
                now, start, end, tz
            ),
        )
    }

    /// The maintenance window could not be interpreted and strict windows are on.
    pub fn malformed_window(detail: &str) -> Self {
        Self::new(
            ConstraintViolationKind::MalformedWindow,
            format!("maintenance window is malformed: {}", detail),
        )
    }

    /// Too many targets for one action.
    pub fn max_targets_exceeded(estimated: usize, max: u64) -> Self {
        Self::new(
            ConstraintViolationKind::MaxTargetsExceeded,
            format!(
                "estimated {} targets exceeds max_targets {}",
                estimated, max
            ),
        )
    }
}

/// Categories of constraint violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintViolationKind {
    /// Environment is not in `allowed_envs` / `environments`.
    EnvironmentNotAllowed,
    /// Write action attempted outside `maintenance_window`.
    OutsideMaintenanceWindow,
    /// `maintenance_window` is unusable (strict mode only).
    MalformedWindow,
    /// Estimated targets exceed `max_targets`.
    MaxTargetsExceeded,
}
