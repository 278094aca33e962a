//! Pipeline and constraint engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the trust pipeline's best-effort collaborator calls.
///
/// Timeouts are optional; when unset the collaborator is expected to bound
/// its own calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound for diagnostics collection, in milliseconds.
    #[serde(default)]
    pub diagnostics_timeout_ms: Option<u64>,

    /// Upper bound for the service topology lookup, in milliseconds.
    #[serde(default)]
    pub topology_timeout_ms: Option<u64>,
}

impl PipelineConfig {
    pub fn diagnostics_timeout(&self) -> Option<Duration> {
        self.diagnostics_timeout_ms.map(Duration::from_millis)
    }

    pub fn topology_timeout(&self) -> Option<Duration> {
        self.topology_timeout_ms.map(Duration::from_millis)
    }
}

/// Constraint engine defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintsConfig {
    /// Target ceiling for write actions when `max_targets` is absent or zero.
    #[serde(default = "default_max_targets")]
    pub default_max_targets: u64,

    /// Treat a malformed maintenance window as a violation instead of as
    /// "no restriction".
    #[serde(default)]
    pub strict_windows: bool,
}

fn default_max_targets() -> u64 {
    50
}

impl Default for ConstraintsConfig {
    fn default() -> Self {
        Self {
            default_max_targets: default_max_targets(),
            strict_windows: false,
        }
    }
}
