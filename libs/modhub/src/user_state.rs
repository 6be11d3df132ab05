//! Per-user install/enable overlay on top of system-wide module state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::ModuleError;
use crate::store::UserStateRepository;

/// Overlay row for one `(user_id, module_id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserModuleState {
    pub user_id: String,
    pub module_id: String,
    pub installed: bool,
    pub enabled: bool,
    pub installed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// What a user actually sees: `enabled` is the conjunction of the system
/// flag and both user flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EffectiveState {
    pub installed: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserModuleEntry {
    pub module_id: String,
    #[serde(flatten)]
    pub state: EffectiveState,
}

/// System-side facts the overlay needs about a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogStatus {
    pub id: String,
    pub system_enabled: bool,
    pub core: bool,
}

/// Read-only view of the active catalog.
pub trait CatalogView: Send + Sync {
    /// `None` when the module is not in the active catalog.
    fn status(&self, module_id: &str) -> Option<CatalogStatus>;

    /// Active modules in registration order.
    fn active_modules(&self) -> Vec<CatalogStatus>;
}

type PairKey = (String, String);

pub struct UserModuleStateStore {
    catalog: Arc<dyn CatalogView>,
    repo: Arc<dyn UserStateRepository>,
    locks: DashMap<PairKey, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for UserModuleStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserModuleStateStore")
            .field("pending_keys", &self.locks.len())
            .finish()
    }
}

impl UserModuleStateStore {
    pub fn new(catalog: Arc<dyn CatalogView>, repo: Arc<dyn UserStateRepository>) -> Self {
        Self {
            catalog,
            repo,
            locks: DashMap::new(),
        }
    }

    pub async fn get_effective_state(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> Result<EffectiveState, ModuleError> {
        let status = self
            .catalog
            .status(module_id)
            .ok_or_else(|| ModuleError::not_found(module_id))?;
        let row = self
            .repo
            .get(user_id, module_id)
            .await
            .map_err(ModuleError::Storage)?;
        Ok(effective(&status, row.as_ref()))
    }

    /// Idempotent: installs and enables the module for the user.
    pub async fn install(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> Result<EffectiveState, ModuleError> {
        self.write(user_id, module_id, |row| {
            row.installed = true;
            row.enabled = true;
        })
        .await
    }

    pub async fn uninstall(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> Result<EffectiveState, ModuleError> {
        self.write(user_id, module_id, |row| {
            row.installed = false;
            row.enabled = false;
        })
        .await
    }

    /// Enabling a module the user never installed installs it as well.
    pub async fn set_enabled(
        &self,
        user_id: &str,
        module_id: &str,
        enabled: bool,
    ) -> Result<EffectiveState, ModuleError> {
        self.write(user_id, module_id, |row| {
            if enabled {
                row.installed = true;
            }
            row.enabled = enabled;
        })
        .await
    }

    /// Effective state of every active module for one user.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<UserModuleEntry>, ModuleError> {
        let rows: HashMap<String, UserModuleState> = self
            .repo
            .list_for_user(user_id)
            .await
            .map_err(ModuleError::Storage)?
            .into_iter()
            .map(|r| (r.module_id.clone(), r))
            .collect();

        Ok(self
            .catalog
            .active_modules()
            .into_iter()
            .map(|status| UserModuleEntry {
                state: effective(&status, rows.get(&status.id)),
                module_id: status.id,
            })
            .collect())
    }

    /// Drops every overlay row of a deleted account.
    pub async fn purge_user(&self, user_id: &str) -> Result<u64, ModuleError> {
        let n = self
            .repo
            .delete_for_user(user_id)
            .await
            .map_err(ModuleError::Storage)?;
        tracing::info!(user = %user_id, rows = n, "User module state purged");
        Ok(n)
    }

    async fn write<F>(
        &self,
        user_id: &str,
        module_id: &str,
        apply: F,
    ) -> Result<EffectiveState, ModuleError>
    where
        F: FnOnce(&mut UserModuleState),
    {
        let status = self
            .catalog
            .status(module_id)
            .ok_or_else(|| ModuleError::not_found(module_id))?;
        if !status.system_enabled {
            return Err(ModuleError::ModuleUnavailable(module_id.to_string()));
        }

        let key = (user_id.to_string(), module_id.to_string());
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.read_modify_write(&status, user_id, apply).await
        };
        drop(lock);
        self.locks.remove_if(&key, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn read_modify_write<F>(
        &self,
        status: &CatalogStatus,
        user_id: &str,
        apply: F,
    ) -> Result<EffectiveState, ModuleError>
    where
        F: FnOnce(&mut UserModuleState),
    {
        let existing = self
            .repo
            .get(user_id, &status.id)
            .await
            .map_err(ModuleError::Storage)?;

        let now = Utc::now();
        let mut row = existing.clone().unwrap_or_else(|| {
            let seed = effective(status, None);
            UserModuleState {
                user_id: user_id.to_string(),
                module_id: status.id.clone(),
                installed: seed.installed,
                enabled: seed.installed,
                installed_at: seed.installed.then_some(now),
                updated_at: now,
            }
        });
        apply(&mut row);

        let unchanged = existing
            .as_ref()
            .is_some_and(|e| e.installed == row.installed && e.enabled == row.enabled);
        if !unchanged {
            if row.installed && row.installed_at.is_none() {
                row.installed_at = Some(now);
            }
            if !row.installed {
                row.installed_at = None;
            }
            row.updated_at = now;
            self.repo.upsert(&row).await.map_err(ModuleError::Storage)?;
            tracing::debug!(
                user = %user_id,
                module = %status.id,
                installed = row.installed,
                enabled = row.enabled,
                "User module state updated"
            );
        }

        Ok(effective(status, Some(&row)))
    }
}

/// Core modules count as installed and enabled for users without a row.
fn effective(status: &CatalogStatus, row: Option<&UserModuleState>) -> EffectiveState {
    let (installed, enabled) = match row {
        Some(r) => (r.installed, r.installed && r.enabled),
        None if status.core => (true, true),
        None => (false, false),
    };
    EffectiveState {
        installed,
        enabled: status.system_enabled && enabled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::InMemoryUserStateRepository;
    use parking_lot::RwLock;

    #[derive(Default)]
    struct FakeCatalog(RwLock<Vec<CatalogStatus>>);

    impl FakeCatalog {
        fn with(modules: &[(&str, bool, bool)]) -> Arc<Self> {
            let list = modules
                .iter()
                .map(|(id, enabled, core)| CatalogStatus {
                    id: id.to_string(),
                    system_enabled: *enabled,
                    core: *core,
                })
                .collect();
            Arc::new(Self(RwLock::new(list)))
        }

        fn set_enabled(&self, id: &str, enabled: bool) {
            for s in self.0.write().iter_mut().filter(|s| s.id == id) {
                s.system_enabled = enabled;
            }
        }
    }

    impl CatalogView for FakeCatalog {
        fn status(&self, module_id: &str) -> Option<CatalogStatus> {
            self.0.read().iter().find(|s| s.id == module_id).cloned()
        }

        fn active_modules(&self) -> Vec<CatalogStatus> {
            self.0.read().clone()
        }
    }

    fn store(catalog: Arc<FakeCatalog>) -> UserModuleStateStore {
        UserModuleStateStore::new(catalog, Arc::new(InMemoryUserStateRepository::default()))
    }

    #[tokio::test]
    async fn defaults_without_row() {
        let s = store(FakeCatalog::with(&[("blog", true, false), ("notes", true, true)]));
        assert_eq!(
            s.get_effective_state("u1", "blog").await.unwrap(),
            EffectiveState::default()
        );
        assert_eq!(
            s.get_effective_state("u1", "notes").await.unwrap(),
            EffectiveState {
                installed: true,
                enabled: true
            }
        );
    }

    #[tokio::test]
    async fn unknown_module_is_not_found() {
        let s = store(FakeCatalog::with(&[]));
        let err = s.get_effective_state("u1", "ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn set_enabled_requires_system_enabled() {
        let catalog = FakeCatalog::with(&[("analysis", false, false)]);
        let s = store(catalog.clone());

        let err = s.set_enabled("u1", "analysis", true).await.unwrap_err();
        assert!(matches!(err, ModuleError::ModuleUnavailable(ref id) if id == "analysis"));

        catalog.set_enabled("analysis", true);
        s.set_enabled("u1", "analysis", true).await.unwrap();
        let st = s.get_effective_state("u1", "analysis").await.unwrap();
        assert!(st.installed && st.enabled);
    }

    #[tokio::test]
    async fn system_disable_masks_user_flags() {
        let catalog = FakeCatalog::with(&[("blog", true, false)]);
        let s = store(catalog.clone());
        s.install("u1", "blog").await.unwrap();

        catalog.set_enabled("blog", false);
        let st = s.get_effective_state("u1", "blog").await.unwrap();
        assert!(st.installed);
        assert!(!st.enabled);
    }

    #[tokio::test]
    async fn disable_keeps_install_and_uninstall_clears_both() {
        let s = store(FakeCatalog::with(&[("blog", true, false)]));
        s.install("u1", "blog").await.unwrap();

        let st = s.set_enabled("u1", "blog", false).await.unwrap();
        assert!(st.installed && !st.enabled);

        let st = s.uninstall("u1", "blog").await.unwrap();
        assert_eq!(st, EffectiveState::default());
    }

    #[tokio::test]
    async fn writes_are_idempotent() {
        let repo = Arc::new(InMemoryUserStateRepository::default());
        let s = UserModuleStateStore::new(FakeCatalog::with(&[("blog", true, false)]), repo.clone());

        s.install("u1", "blog").await.unwrap();
        let first = repo.get("u1", "blog").await.unwrap().unwrap();
        s.install("u1", "blog").await.unwrap();
        let second = repo.get("u1", "blog").await.unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn core_module_opt_out_is_remembered() {
        let s = store(FakeCatalog::with(&[("notes", true, true)]));
        let st = s.set_enabled("u1", "notes", false).await.unwrap();
        assert!(st.installed && !st.enabled);
        assert_eq!(
            s.get_effective_state("u1", "notes").await.unwrap(),
            EffectiveState {
                installed: true,
                enabled: false
            }
        );
    }

    #[tokio::test]
    async fn concurrent_toggles_serialize_per_key() {
        let s = Arc::new(store(FakeCatalog::with(&[("blog", true, false)])));
        let mut handles = Vec::new();
        for i in 0..32 {
            let s = s.clone();
            handles.push(tokio::spawn(async move {
                s.set_enabled("u1", "blog", i % 2 == 0).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        // every write went through the per-key lock and the map is drained
        assert_eq!(s.locks.len(), 0);
        assert!(s.get_effective_state("u1", "blog").await.unwrap().installed);
    }

    #[tokio::test]
    async fn list_and_purge() {
        let s = store(FakeCatalog::with(&[("blog", true, false), ("notes", true, true)]));
        s.install("u1", "blog").await.unwrap();

        let list = s.list_for_user("u1").await.unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|e| e.state.enabled));

        assert_eq!(s.purge_user("u1").await.unwrap(), 1);
        let list = s.list_for_user("u1").await.unwrap();
        let blog = list.iter().find(|e| e.module_id == "blog").unwrap();
        assert!(!blog.state.installed);
    }
}
