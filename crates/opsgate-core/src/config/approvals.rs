//! Approval configuration.

use serde::{Deserialize, Serialize};

/// Settings for approval requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalsConfig {
    /// How long a pending approval stays valid.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,

    /// Auto-approve low-risk plans submitted by a human operator.
    ///
    /// Never consulted for plans produced by the trust pipeline: those are
    /// planner-generated and always wait for a human decision.
    #[serde(default)]
    pub auto_approve_low: bool,
}

/// Ten years. Longer TTLs are rejected at load time.
pub const MAX_TTL_HOURS: i64 = 87_600;

fn default_ttl_hours() -> i64 {
    24
}

impl ApprovalsConfig {
    /// The TTL as a duration, clamped to `1..=MAX_TTL_HOURS` hours.
    pub fn ttl(&self) -> chrono::Duration {
        let hours = self.ttl_hours.clamp(1, MAX_TTL_HOURS);
        chrono::Duration::try_hours(hours).unwrap_or_else(|| chrono::Duration::hours(24))
    }
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            auto_approve_low: false,
        }
    }
}
