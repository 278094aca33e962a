//! Plan persistence.
//!
//! [`PlanStore`] is the narrow persistence capability the pipeline and the
//! execution gate need. [`InMemoryPlanStore`] is the reference
//! implementation; it also carries the approve / reject operations a human
//! reviewer drives.

use crate::approval::{ApprovalError, ApprovalRequest};
use crate::integrity::PlanDigest;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use opsgate_core::{Constraints, ContextRef};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Persist a serialized plan and return its id.
    async fn create_plan(&self, payload: Value) -> anyhow::Result<String>;

    async fn get_plan(&self, plan_id: &str) -> anyhow::Result<Option<Value>>;

    /// Create the approval request for a plan and return its id.
    async fn create_approval(&self, plan_id: &str) -> anyhow::Result<String>;

    /// The plan's approval request, with lazy expiry applied.
    async fn approval_for_plan(&self, plan_id: &str) -> anyhow::Result<Option<ApprovalRequest>>;

    /// Record the plan digest. A digest is written once and never replaced.
    async fn save_plan_hash(&self, plan_id: &str, digest: &PlanDigest) -> anyhow::Result<()>;

    async fn plan_hash(&self, plan_id: &str) -> anyhow::Result<Option<PlanDigest>>;

    async fn has_active_execution(&self, plan_id: &str) -> anyhow::Result<bool>;

    /// Atomically claim the plan's single execution. Returns false when the
    /// plan is executing or has executed before.
    async fn begin_execution(&self, plan_id: &str) -> anyhow::Result<bool>;

    /// Release the active-execution mark. The claim itself is kept, so the
    /// plan cannot be authorized again.
    async fn finish_execution(&self, plan_id: &str) -> anyhow::Result<()>;
}

#[derive(Default)]
struct StoreState {
    plans: HashMap<String, Value>,
    approvals: HashMap<String, ApprovalRequest>,
    approval_by_plan: HashMap<String, String>,
    hashes: HashMap<String, PlanDigest>,
    executions: HashSet<String>,
    claimed: HashSet<String>,
}

/// In-memory plan store.
pub struct InMemoryPlanStore {
    state: RwLock<StoreState>,
    approval_ttl: Duration,
}

impl InMemoryPlanStore {
    pub fn new(approval_ttl: Duration) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            approval_ttl,
        }
    }

    pub fn plan_count(&self) -> usize {
        self.state.read().map(|s| s.plans.len()).unwrap_or(0)
    }

    pub fn approval_count(&self) -> usize {
        self.state.read().map(|s| s.approvals.len()).unwrap_or(0)
    }

    /// Overwrite a persisted plan. Stands in for anything that edits plan
    /// rows behind the pipeline's back.
    pub fn replace_plan(&self, plan_id: &str, payload: Value) -> anyhow::Result<()> {
        let mut state = self.write()?;
        let Some(slot) = state.plans.get_mut(plan_id) else {
            bail!("plan not found: {plan_id}");
        };
        *slot = payload;
        Ok(())
    }

    pub fn get_approval(&self, approval_id: &str) -> Result<ApprovalRequest, ApprovalError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| ApprovalError::Storage("lock poisoned".to_string()))?;
        let request = state
            .approvals
            .get_mut(approval_id)
            .ok_or_else(|| ApprovalError::NotFound(approval_id.to_string()))?;
        request.refresh(Utc::now());
        Ok(request.clone())
    }

    pub fn approve(
        &self,
        approval_id: &str,
        by: impl Into<String>,
        reason: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let by = by.into();
        self.decide(approval_id, |request| {
            request.approve(by, reason, Utc::now())
        })
    }

    pub fn reject(
        &self,
        approval_id: &str,
        by: impl Into<String>,
        reason: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let by = by.into();
        self.decide(approval_id, |request| request.reject(by, reason, Utc::now()))
    }

    pub fn cancel(&self, approval_id: &str) -> Result<ApprovalRequest, ApprovalError> {
        self.decide(approval_id, |request| request.cancel(Utc::now()))
    }

    fn decide(
        &self,
        approval_id: &str,
        apply: impl FnOnce(&mut ApprovalRequest) -> Result<(), ApprovalError>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| ApprovalError::Storage("lock poisoned".to_string()))?;
        let request = state
            .approvals
            .get_mut(approval_id)
            .ok_or_else(|| ApprovalError::NotFound(approval_id.to_string()))?;
        apply(request)?;
        tracing::info!(
            approval_id = %request.id,
            plan_id = %request.plan_id,
            status = %request.status,
            "approval decided"
        );
        Ok(request.clone())
    }

    fn read(&self) -> anyhow::Result<std::sync::RwLockReadGuard<'_, StoreState>> {
        self.state.read().map_err(|_| anyhow!("plan store lock poisoned"))
    }

    fn write(&self) -> anyhow::Result<std::sync::RwLockWriteGuard<'_, StoreState>> {
        self.state.write().map_err(|_| anyhow!("plan store lock poisoned"))
    }
}

impl Default for InMemoryPlanStore {
    fn default() -> Self {
        Self::new(Duration::hours(24))
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn create_plan(&self, payload: Value) -> anyhow::Result<String> {
        let id = Uuid::new_v4().to_string();
        self.write()?.plans.insert(id.clone(), payload);
        Ok(id)
    }

    async fn get_plan(&self, plan_id: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.read()?.plans.get(plan_id).cloned())
    }

    async fn create_approval(&self, plan_id: &str) -> anyhow::Result<String> {
        let mut state = self.write()?;
        let Some(plan) = state.plans.get(plan_id) else {
            bail!("cannot request approval for unknown plan {plan_id}");
        };
        if state.approval_by_plan.contains_key(plan_id) {
            bail!("plan {plan_id} already has an approval request");
        }

        let context = plan
            .get("context")
            .and_then(|v| serde_json::from_value::<ContextRef>(v.clone()).ok());
        let constraints = plan
            .get("constraints")
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value::<Constraints>(v.clone()).ok());
        let tenant = context
            .as_ref()
            .map(|c| c.tenant.clone())
            .unwrap_or_default();

        let mut request = ApprovalRequest::new(plan_id, tenant, Utc::now(), self.approval_ttl)?;
        if let Some(context) = context {
            request = request.with_scope(context, constraints);
        }
        let id = request.id.clone();
        state
            .approval_by_plan
            .insert(plan_id.to_string(), id.clone());
        state.approvals.insert(id.clone(), request);
        Ok(id)
    }

    async fn approval_for_plan(&self, plan_id: &str) -> anyhow::Result<Option<ApprovalRequest>> {
        let mut state = self.write()?;
        let Some(id) = state.approval_by_plan.get(plan_id).cloned() else {
            return Ok(None);
        };
        Ok(state.approvals.get_mut(&id).map(|request| {
            request.refresh(Utc::now());
            request.clone()
        }))
    }

    async fn save_plan_hash(&self, plan_id: &str, digest: &PlanDigest) -> anyhow::Result<()> {
        let mut state = self.write()?;
        if state.hashes.contains_key(plan_id) {
            bail!("plan {plan_id} already has a recorded digest");
        }
        state.hashes.insert(plan_id.to_string(), digest.clone());
        Ok(())
    }

    async fn plan_hash(&self, plan_id: &str) -> anyhow::Result<Option<PlanDigest>> {
        Ok(self.read()?.hashes.get(plan_id).cloned())
    }

    async fn has_active_execution(&self, plan_id: &str) -> anyhow::Result<bool> {
        Ok(self.read()?.executions.contains(plan_id))
    }

    async fn begin_execution(&self, plan_id: &str) -> anyhow::Result<bool> {
        let mut state = self.write()?;
        if !state.claimed.insert(plan_id.to_string()) {
            return Ok(false);
        }
        state.executions.insert(plan_id.to_string());
        Ok(true)
    }

    async fn finish_execution(&self, plan_id: &str) -> anyhow::Result<()> {
        self.write()?.executions.remove(plan_id);
        Ok(())
    }
}
