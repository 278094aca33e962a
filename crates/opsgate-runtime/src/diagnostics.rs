//! Diagnostics and topology collaborators.
//!
//! Both are best-effort: the pipeline bounds them with optional timeouts and
//! treats any failure as "no evidence" or "no extra hints".

use async_trait::async_trait;
use opsgate_core::{Constraints, ContextRef, Evidence};
use opsgate_policy::DiagnosticHints;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait DiagnosticsCollector: Send + Sync {
    async fn collect(
        &self,
        context: &ContextRef,
        intent: &str,
        constraints: Option<&Constraints>,
    ) -> anyhow::Result<Vec<Evidence>>;
}

/// Collector that gathers nothing.
pub struct NoopDiagnostics;

#[async_trait]
impl DiagnosticsCollector for NoopDiagnostics {
    async fn collect(
        &self,
        _context: &ContextRef,
        _intent: &str,
        _constraints: Option<&Constraints>,
    ) -> anyhow::Result<Vec<Evidence>> {
        Ok(Vec::new())
    }
}

/// Collector that records the hinted queries as evidence without running
/// them, so the planner and the approver see what should be looked at.
pub struct HintedQueries;

#[async_trait]
impl DiagnosticsCollector for HintedQueries {
    async fn collect(
        &self,
        _context: &ContextRef,
        _intent: &str,
        constraints: Option<&Constraints>,
    ) -> anyhow::Result<Vec<Evidence>> {
        let hints = DiagnosticHints::from_constraints(constraints);
        let promql = hints.promql.into_iter().map(|q| Evidence::query("promql", q));
        let traceql = hints
            .traceql
            .into_iter()
            .map(|q| Evidence::query("traceql", q));
        let traces = hints
            .trace_ids
            .into_iter()
            .map(|id| Evidence::query("trace", id));
        Ok(promql.chain(traceql).chain(traces).collect())
    }
}

/// A node in the service topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceNode {
    pub name: String,
    pub kind: String,
    /// Query text for `promql` / `traceql` nodes. Falls back to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEdge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceGraph {
    #[serde(default)]
    pub nodes: Vec<ServiceNode>,
    #[serde(default)]
    pub edges: Vec<ServiceEdge>,
}

impl ServiceGraph {
    /// Query hints seeded by `promql` and `traceql` nodes.
    pub fn diagnostic_hints(&self) -> DiagnosticHints {
        let mut hints = DiagnosticHints::default();
        for node in &self.nodes {
            let query = node.query.as_deref().unwrap_or(&node.name).trim();
            if query.is_empty() {
                continue;
            }
            if node.kind.eq_ignore_ascii_case("promql") {
                hints.promql.push(query.to_string());
            } else if node.kind.eq_ignore_ascii_case("traceql") {
                hints.traceql.push(query.to_string());
            }
        }
        hints
    }
}

#[async_trait]
pub trait TopologyLookup: Send + Sync {
    async fn graph(&self, context: &ContextRef) -> anyhow::Result<ServiceGraph>;
}

/// Lookup that always returns the same graph.
pub struct StaticTopology(pub ServiceGraph);

#[async_trait]
impl TopologyLookup for StaticTopology {
    async fn graph(&self, _context: &ContextRef) -> anyhow::Result<ServiceGraph> {
        Ok(self.0.clone())
    }
}
