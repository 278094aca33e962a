//! Plan integrity digest.
//!
//! The digest binds a plan's intent and ordered steps. It is SHA-256 over the
//! RFC 8785 canonical JSON of `{intent, steps}`, so key order inside step
//! inputs and a serialize/deserialize round trip do not change it.
//!
//! Lifecycle: computed and stored once when an approval is created, verified
//! once before execution against the re-loaded plan.

use opsgate_core::PlanStep;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanDigest(String);

impl PlanDigest {
    pub fn from_hex(value: impl Into<String>) -> Self {
        Self(value.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlanDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised when computing or verifying a digest.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize plan: {0}")]
    Canonicalization(String),

    /// The recomputed digest differs from the stored one.
    #[error("plan digest mismatch (expected {expected}, computed {actual})")]
    Mismatch {
        expected: PlanDigest,
        actual: PlanDigest,
    },
}

#[derive(Serialize)]
struct HashInput<'a> {
    intent: &'a str,
    steps: &'a [PlanStep],
}

/// Compute the digest of an intent and its ordered steps.
pub fn compute_plan_hash(intent: &str, steps: &[PlanStep]) -> Result<PlanDigest, IntegrityError> {
    let bytes = serde_jcs::to_vec(&HashInput { intent, steps })
        .map_err(|e| IntegrityError::Canonicalization(e.to_string()))?;
    Ok(PlanDigest(hex::encode(Sha256::digest(&bytes))))
}

/// Recompute and compare. Any difference is a mismatch.
pub fn verify_plan_hash(
    stored: &PlanDigest,
    intent: &str,
    steps: &[PlanStep],
) -> Result<(), IntegrityError> {
    let actual = compute_plan_hash(intent, steps)?;
    if actual != *stored {
        return Err(IntegrityError::Mismatch {
            expected: stored.clone(),
            actual,
        });
    }
    Ok(())
}
