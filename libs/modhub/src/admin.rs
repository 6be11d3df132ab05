//! Administrative and per-user operations as direct calls.
//!
//! The HTTP layer is a thin adapter over this facade; every call returns a
//! serializable view or a [`ModuleError`] whose [`kind`](ModuleError::kind)
//! picks the response category.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ModuleError;
use crate::manifest::Manifest;
use crate::runtime::{LifecycleOrchestrator, ModuleState, Snapshot};
use crate::user_state::{EffectiveState, UserModuleEntry, UserModuleStateStore};

/// Catalog entry with its system-wide state.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleView {
    pub manifest: Manifest,
    pub state: ModuleState,
    pub installed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ModuleView {
    fn from_snapshot(snap: &Snapshot, manifest: &Manifest) -> Self {
        let record = snap.record(&manifest.id);
        Self {
            manifest: manifest.clone(),
            state: record.map_or(ModuleState::Discovered, |r| r.state),
            installed_at: record.and_then(|r| r.installed_at),
            updated_at: record.map(|r| r.updated_at),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditView {
    pub id: String,
    pub version: String,
    pub uninstalled_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AdminApi {
    orchestrator: Arc<LifecycleOrchestrator>,
    users: Arc<UserModuleStateStore>,
}

impl std::fmt::Debug for AdminApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminApi").finish_non_exhaustive()
    }
}

impl AdminApi {
    pub fn new(orchestrator: Arc<LifecycleOrchestrator>, users: Arc<UserModuleStateStore>) -> Self {
        Self {
            orchestrator,
            users,
        }
    }

    pub fn orchestrator(&self) -> &Arc<LifecycleOrchestrator> {
        &self.orchestrator
    }

    /// Active catalog in registration order.
    pub fn list_modules(&self) -> Vec<ModuleView> {
        let snap = self.orchestrator.snapshot();
        snap.registry()
            .all()
            .map(|m| ModuleView::from_snapshot(&snap, m))
            .collect()
    }

    pub fn module(&self, id: &str) -> Result<ModuleView, ModuleError> {
        let snap = self.orchestrator.snapshot();
        let manifest = snap.registry().get(id)?;
        Ok(ModuleView::from_snapshot(&snap, manifest))
    }

    pub fn audit_log(&self) -> Vec<AuditView> {
        self.orchestrator
            .audit_log()
            .into_iter()
            .map(|e| AuditView {
                id: e.manifest.id.clone(),
                version: e.manifest.version.clone(),
                uninstalled_at: e.uninstalled_at,
            })
            .collect()
    }

    pub async fn enable(&self, id: &str) -> Result<ModuleView, ModuleError> {
        self.orchestrator.activate(id).await?;
        self.module(id)
    }

    pub async fn disable(&self, id: &str) -> Result<ModuleView, ModuleError> {
        self.orchestrator.deactivate(id).await?;
        self.module(id)
    }

    pub async fn uninstall(&self, id: &str) -> Result<(), ModuleError> {
        self.orchestrator.uninstall(id).await
    }

    pub async fn user_modules(&self, user_id: &str) -> Result<Vec<UserModuleEntry>, ModuleError> {
        self.users.list_for_user(user_id).await
    }

    pub async fn user_install(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> Result<EffectiveState, ModuleError> {
        self.users.install(user_id, module_id).await
    }

    pub async fn user_uninstall(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> Result<EffectiveState, ModuleError> {
        self.users.uninstall(user_id, module_id).await
    }

    pub async fn user_set_enabled(
        &self,
        user_id: &str,
        module_id: &str,
        enabled: bool,
    ) -> Result<EffectiveState, ModuleError> {
        self.users.set_enabled(user_id, module_id, enabled).await
    }

    pub async fn user_effective_state(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> Result<EffectiveState, ModuleError> {
        self.users.get_effective_state(user_id, module_id).await
    }

    /// Removes every overlay row of a deleted account.
    pub async fn user_purge(&self, user_id: &str) -> Result<u64, ModuleError> {
        self.users.purge_user(user_id).await
    }
}
