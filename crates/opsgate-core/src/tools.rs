//! Registry of tools a plan step may invoke.
//!
//! The set is closed: a tool the planner names that is not a variant here is
//! never executed. Adding a tool is a code change.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A registered tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// Kubernetes CLI.
    Kubectl,
    /// Kubernetes package manager.
    Helm,
    /// AWS CLI.
    Aws,
    /// Secret store CLI.
    Vault,
    /// GitOps controller CLI.
    Argocd,
    /// Prometheus metrics query.
    Promql,
    /// Tempo trace query.
    Traceql,
}

impl ToolKind {
    pub const ALL: [ToolKind; 7] = [
        ToolKind::Kubectl,
        ToolKind::Helm,
        ToolKind::Aws,
        ToolKind::Vault,
        ToolKind::Argocd,
        ToolKind::Promql,
        ToolKind::Traceql,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Kubectl => "kubectl",
            ToolKind::Helm => "helm",
            ToolKind::Aws => "aws",
            ToolKind::Vault => "vault",
            ToolKind::Argocd => "argocd",
            ToolKind::Promql => "promql",
            ToolKind::Traceql => "traceql",
        }
    }

    /// Case-insensitive lookup. Surrounding whitespace is ignored.
    pub fn from_name(name: &str) -> Option<ToolKind> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|tool| tool.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
