//! System-wide lifecycle state machine.
//!
//! All transitions of one module id are serialized through a per-id async
//! mutex; a transition also holds the locks of the ids it checks (its
//! dependencies for `activate`, its dependents for `deactivate`/`uninstall`),
//! always acquired in sorted order. Hooks run before anything is published:
//! a transition either commits state, persistence and bindings together or
//! leaves the module where it was.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::Router;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use semver::{Version, VersionReq};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::binding::{PermissionRegistrar, RouteBinder};
use crate::context::{ModuleContextBuilder, ModuleCtx};
use crate::error::{Hook, HookError, ModuleError};
use crate::manifest::Manifest;
use crate::registry::{ManifestRegistry, ModuleEntry};
use crate::resolver::DependencyResolver;
use crate::runtime::state::{ModuleState, RuntimeRecord, Snapshot};
use crate::store::{InMemoryRuntimeStateRepository, RuntimeStateRepository};
use crate::user_state::{CatalogStatus, CatalogView};

/// Host version manifests are checked against.
pub const HOST_KERNEL_VERSION: Version = Version::new(0, 1, 0);

pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Decides whether a manifest can run on this host.
pub trait KernelCompat: Send + Sync {
    fn host_version(&self) -> String;

    fn is_compatible(&self, manifest: &Manifest) -> bool;
}

/// Matches `kernel_version` as a semver requirement against the host version.
#[derive(Debug, Clone)]
pub struct SemverCompat {
    host: Version,
}

impl SemverCompat {
    pub fn new(host: Version) -> Self {
        Self { host }
    }
}

impl Default for SemverCompat {
    fn default() -> Self {
        Self::new(HOST_KERNEL_VERSION)
    }
}

impl KernelCompat for SemverCompat {
    fn host_version(&self) -> String {
        self.host.to_string()
    }

    fn is_compatible(&self, manifest: &Manifest) -> bool {
        VersionReq::parse(&manifest.kernel_version)
            .map(|req| req.matches(&self.host))
            .unwrap_or(false)
    }
}

/// Manifest of an uninstalled module, kept for history.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub manifest: Arc<Manifest>,
    pub uninstalled_at: DateTime<Utc>,
}

#[derive(Clone)]
struct Retired {
    entry: ModuleEntry,
    at: DateTime<Utc>,
}

/// Result of booting one module.
#[derive(Debug)]
pub enum BootOutcome {
    Activated,
    Failed(ModuleError),
    DependencyUnavailable(String),
    SkippedByDefault,
    SkippedByPersistedState,
}

#[derive(Debug, Default)]
pub struct BootReport {
    /// Resolved activation order over the whole catalog.
    pub order: Vec<String>,
    pub outcomes: Vec<(String, BootOutcome)>,
}

impl BootReport {
    pub fn outcome(&self, id: &str) -> Option<&BootOutcome> {
        self.outcomes
            .iter()
            .find(|(m, _)| m == id)
            .map(|(_, o)| o)
    }

    pub fn activated(&self) -> impl Iterator<Item = &str> + '_ {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, BootOutcome::Activated))
            .map(|(m, _)| m.as_str())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &ModuleError)> + '_ {
        self.outcomes.iter().filter_map(|(m, o)| match o {
            BootOutcome::Failed(e) => Some((m.as_str(), e)),
            _ => None,
        })
    }
}

pub struct LifecycleOrchestrator {
    snapshot: Arc<ArcSwap<Snapshot>>,
    writer: parking_lot::Mutex<()>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    repo: Arc<dyn RuntimeStateRepository>,
    contexts: ModuleContextBuilder,
    hook_timeout: Duration,
    kernel: Arc<dyn KernelCompat>,
    overrides: HashMap<String, bool>,
    audit: parking_lot::Mutex<Vec<Retired>>,
}

impl std::fmt::Debug for LifecycleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleOrchestrator")
            .field("snapshot", &self.snapshot.load())
            .field("hook_timeout", &self.hook_timeout)
            .field("overrides", &self.overrides)
            .finish()
    }
}

impl LifecycleOrchestrator {
    /// Takes ownership of the catalog; every module starts `Discovered`.
    pub fn new(registry: ManifestRegistry) -> Self {
        Self {
            snapshot: Arc::new(ArcSwap::from_pointee(Snapshot::new(registry))),
            writer: parking_lot::Mutex::new(()),
            locks: DashMap::new(),
            repo: Arc::new(InMemoryRuntimeStateRepository::default()),
            contexts: ModuleContextBuilder::default(),
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
            kernel: Arc::new(SemverCompat::default()),
            overrides: HashMap::new(),
            audit: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn with_repository(mut self, repo: Arc<dyn RuntimeStateRepository>) -> Self {
        self.repo = repo;
        self
    }

    pub fn with_contexts(mut self, contexts: ModuleContextBuilder) -> Self {
        self.contexts = contexts;
        self
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn with_kernel_compat(mut self, kernel: Arc<dyn KernelCompat>) -> Self {
        self.kernel = kernel;
        self
    }

    /// Overrides the manifest's default `enabled` flag at boot.
    pub fn with_enabled_override(mut self, module_id: impl Into<String>, enabled: bool) -> Self {
        self.overrides.insert(module_id.into(), enabled);
        self
    }

    // ---------------- readers ----------------

    /// Current consistent view; never blocks.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    pub fn state_of(&self, id: &str) -> Option<ModuleState> {
        self.snapshot.load().state_of(id)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.snapshot.load().is_enabled(id)
    }

    pub fn permissions(&self) -> PermissionRegistrar {
        PermissionRegistrar::new(self.snapshot.clone())
    }

    pub fn routes(&self) -> RouteBinder {
        RouteBinder::new(self.snapshot.clone())
    }

    pub fn hook_timeout(&self) -> Duration {
        self.hook_timeout
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit
            .lock()
            .iter()
            .map(|r| AuditEntry {
                manifest: r.entry.manifest.clone(),
                uninstalled_at: r.at,
            })
            .collect()
    }

    // ---------------- boot ----------------

    /// Restore persisted state, then activate modules in dependency order.
    ///
    /// Structural problems (cycles, unknown dependencies) and an unreadable
    /// state table are fatal. A module that fails to activate is reported and
    /// skipped; so are the modules depending on it.
    pub async fn boot(&self) -> Result<BootReport, ModuleError> {
        let snap = self.snapshot.load_full();
        let order = DependencyResolver::resolve_order(snap.registry.all().map(|m| m.as_ref()))?;
        tracing::info!(order = ?order, "Resolved module activation order");

        let persisted: HashMap<String, RuntimeRecord> = self
            .repo
            .load_all()
            .await
            .map_err(ModuleError::Storage)?
            .into_iter()
            .map(|r| (r.module_id.clone(), r))
            .collect();
        self.restore(&persisted);

        let mut report = BootReport {
            order: order.clone(),
            outcomes: Vec::with_capacity(order.len()),
        };
        for id in order {
            let outcome = self.boot_one(&id, persisted.get(&id)).await;
            match &outcome {
                BootOutcome::Activated => {}
                BootOutcome::Failed(e) => {
                    tracing::error!(module = %id, error = %e, "Module failed to activate at boot");
                }
                BootOutcome::DependencyUnavailable(dep) => {
                    tracing::warn!(module = %id, dependency = %dep, "Module skipped: dependency unavailable");
                }
                BootOutcome::SkippedByDefault => {
                    tracing::debug!(module = %id, "Module disabled by default");
                }
                BootOutcome::SkippedByPersistedState => {
                    tracing::info!(module = %id, "Module kept inactive by persisted state");
                }
            }
            report.outcomes.push((id, outcome));
        }

        tracing::info!(
            activated = report.activated().count(),
            failed = report.failed().count(),
            total = report.outcomes.len(),
            "Module boot complete"
        );
        Ok(report)
    }

    fn restore(&self, persisted: &HashMap<String, RuntimeRecord>) {
        let retired = self.publish(|s| {
            let mut retired = Vec::new();
            for (id, rec) in persisted {
                if !s.registry.contains(id) {
                    tracing::debug!(module = %id, "Ignoring persisted state of unknown module");
                    continue;
                }
                match rec.state {
                    ModuleState::Uninstalled => {
                        if let Some(entry) = s.registry.remove(id) {
                            s.states.remove(id);
                            retired.push(Retired {
                                entry,
                                at: rec.updated_at,
                            });
                        }
                    }
                    // not bound yet: only on_enable runs again
                    ModuleState::Enabled | ModuleState::Installed => {
                        s.states.insert(
                            id.clone(),
                            RuntimeRecord {
                                state: ModuleState::Installed,
                                ..rec.clone()
                            },
                        );
                    }
                    ModuleState::Disabled => {
                        s.states.insert(id.clone(), rec.clone());
                    }
                    ModuleState::Discovered => {}
                }
            }
            retired
        });
        self.audit.lock().extend(retired);
    }

    async fn boot_one(&self, id: &str, persisted: Option<&RuntimeRecord>) -> BootOutcome {
        let snap = self.snapshot.load_full();
        let Ok(manifest) = snap.registry.get(id) else {
            return BootOutcome::SkippedByPersistedState;
        };

        let wants = match (persisted.map(|r| r.state), self.overrides.get(id)) {
            (Some(ModuleState::Disabled), _) => return BootOutcome::SkippedByPersistedState,
            (_, Some(&enabled)) => enabled,
            (Some(ModuleState::Enabled), None) => true,
            _ => manifest.enabled,
        };
        if !wants {
            return BootOutcome::SkippedByDefault;
        }

        if let Some(dep) = manifest.dependencies.iter().find(|d| !snap.is_enabled(d)) {
            return BootOutcome::DependencyUnavailable(dep.clone());
        }

        match self.activate(id).await {
            Ok(()) => BootOutcome::Activated,
            Err(e) => BootOutcome::Failed(e),
        }
    }

    // ---------------- transitions ----------------

    /// Install (when needed) and enable a module, then bind its exports.
    ///
    /// Idempotent for an `Enabled` module: no hook runs again.
    pub async fn activate(&self, id: &str) -> Result<(), ModuleError> {
        let (entry, _) = self.lookup(&self.snapshot.load(), id)?;
        let mut lock_set: Vec<String> = entry.manifest.dependencies.iter().cloned().collect();
        lock_set.push(id.to_string());
        let _guards = self.lock_ids(lock_set).await;

        let snap = self.snapshot.load_full();
        let (entry, prior) = self.lookup(&snap, id)?;
        if prior == ModuleState::Enabled {
            tracing::debug!(module = %id, "Module already enabled");
            return Ok(());
        }

        if !self.kernel.is_compatible(&entry.manifest) {
            return Err(ModuleError::IncompatibleKernel {
                module: id.to_string(),
                required: entry.manifest.kernel_version.clone(),
                host: self.kernel.host_version(),
            });
        }
        if let Some(dep) = entry
            .manifest
            .dependencies
            .iter()
            .find(|d| !snap.is_enabled(d))
        {
            return Err(ModuleError::DependencyUnavailable {
                module: id.to_string(),
                dependency: dep.clone(),
            });
        }

        let ctx = self.contexts.for_module(id);
        let needs_install = !prior.is_installed();
        if needs_install {
            if let Some(hook) = entry.module.as_installable() {
                self.run_hook(id, Hook::Install, &ctx, hook.on_install(&ctx))
                    .await?;
            }
        }
        let installed_at = if needs_install {
            Some(Utc::now())
        } else {
            snap.record(id).and_then(|r| r.installed_at)
        };

        match self.enable_phase(&entry, &ctx).await {
            Ok(router) => {
                self.commit(&entry, ModuleState::Enabled, installed_at, |s, m| {
                    s.bindings.bind(m, router)
                })
                .await?;
                tracing::info!(module = %id, installed = needs_install, "Module enabled");
                Ok(())
            }
            Err(e) => {
                if needs_install {
                    self.roll_back_install(&entry).await;
                }
                Err(e)
            }
        }
    }

    /// Undo a fresh install whose enable phase failed; the prior state is kept.
    async fn roll_back_install(&self, entry: &ModuleEntry) {
        let Some(hook) = entry.module.as_uninstallable() else {
            return;
        };
        let id = entry.id();
        let ctx = self.contexts.for_module(id);
        match self
            .run_hook(id, Hook::Uninstall, &ctx, hook.on_uninstall(&ctx))
            .await
        {
            Ok(()) => tracing::info!(module = %id, "Install rolled back after failed enable"),
            Err(e) => tracing::error!(module = %id, error = %e, "Install rollback failed"),
        }
    }

    async fn enable_phase(
        &self,
        entry: &ModuleEntry,
        ctx: &ModuleCtx,
    ) -> Result<Option<Router>, ModuleError> {
        let id = entry.id();
        let router = match entry.module.as_restful() {
            Some(rest) => Some(
                rest.router(ctx)
                    .map_err(|e| ModuleError::hook(id, Hook::Router, HookError::Failed(e)))?,
            ),
            None => None,
        };
        if let Some(hook) = entry.module.as_enablable() {
            self.run_hook(id, Hook::Enable, ctx, hook.on_enable(ctx))
                .await?;
        }
        Ok(router)
    }

    /// Disable a module nobody enabled depends on, unbinding its exports.
    pub async fn deactivate(&self, id: &str) -> Result<(), ModuleError> {
        let dependents = self.dependents(id);
        let mut lock_set = dependents;
        lock_set.push(id.to_string());
        let _guards = self.lock_ids(lock_set).await;

        let snap = self.snapshot.load_full();
        let (entry, state) = self.lookup(&snap, id)?;
        match state {
            ModuleState::Disabled => {
                tracing::debug!(module = %id, "Module already disabled");
                return Ok(());
            }
            ModuleState::Enabled => {}
            other => {
                return Err(ModuleError::InvalidTransition {
                    module: id.to_string(),
                    action: "disable",
                    state: other,
                })
            }
        }

        let active: Vec<String> = snap
            .registry
            .dependents_of(id)
            .into_iter()
            .filter(|d| snap.is_enabled(d))
            .map(str::to_string)
            .collect();
        if !active.is_empty() {
            return Err(ModuleError::DependentActive {
                module: id.to_string(),
                dependents: active,
            });
        }

        if let Some(hook) = entry.module.as_disablable() {
            let ctx = self.contexts.for_module(id);
            self.run_hook(id, Hook::Disable, &ctx, hook.on_disable(&ctx))
                .await?;
        }

        let installed_at = snap.record(id).and_then(|r| r.installed_at);
        self.commit(&entry, ModuleState::Disabled, installed_at, |s, m| {
            s.bindings.unbind(m)
        })
        .await?;
        tracing::info!(module = %id, "Module disabled");
        Ok(())
    }

    /// Remove a disabled module from the active catalog into the audit log.
    pub async fn uninstall(&self, id: &str) -> Result<(), ModuleError> {
        let dependents = self.dependents(id);
        let mut lock_set = dependents;
        lock_set.push(id.to_string());
        let _guards = self.lock_ids(lock_set).await;

        let snap = self.snapshot.load_full();
        let (entry, state) = self.lookup(&snap, id)?;
        if state != ModuleState::Disabled {
            return Err(ModuleError::InvalidTransition {
                module: id.to_string(),
                action: "uninstall",
                state,
            });
        }

        if let Some(hook) = entry.module.as_uninstallable() {
            let ctx = self.contexts.for_module(id);
            self.run_hook(id, Hook::Uninstall, &ctx, hook.on_uninstall(&ctx))
                .await?;
        }

        let record = RuntimeRecord {
            module_id: id.to_string(),
            state: ModuleState::Uninstalled,
            installed_at: None,
            updated_at: Utc::now(),
        };
        self.repo
            .save(&record)
            .await
            .map_err(ModuleError::Storage)?;
        // retire first so a concurrent lookup always finds the module somewhere
        self.audit.lock().push(Retired {
            entry: entry.clone(),
            at: record.updated_at,
        });
        self.publish(|s| {
            s.registry.remove(id);
            s.states.remove(id);
            s.bindings.unbind(&entry.manifest);
        });
        tracing::info!(module = %id, "Module uninstalled");
        Ok(())
    }

    // ---------------- internals ----------------

    /// Active entry with its state, or the last retired entry as `Uninstalled`.
    fn lookup(&self, snap: &Snapshot, id: &str) -> Result<(ModuleEntry, ModuleState), ModuleError> {
        if let Ok(entry) = snap.registry.entry(id) {
            let state = snap.state_of(id).unwrap_or(ModuleState::Discovered);
            return Ok((entry.clone(), state));
        }
        self.audit
            .lock()
            .iter()
            .rev()
            .find(|r| r.entry.id() == id)
            .map(|r| (r.entry.clone(), ModuleState::Uninstalled))
            .ok_or_else(|| ModuleError::not_found(id))
    }

    fn dependents(&self, id: &str) -> Vec<String> {
        self.snapshot
            .load()
            .registry
            .dependents_of(id)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    async fn lock_ids(&self, mut ids: Vec<String>) -> Vec<OwnedMutexGuard<()>> {
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let lock = self.locks.entry(id).or_default().clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    async fn run_hook<F>(
        &self,
        module: &str,
        hook: Hook,
        ctx: &ModuleCtx,
        fut: F,
    ) -> Result<(), ModuleError>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        let started = Instant::now();
        match tokio::time::timeout(self.hook_timeout, fut).await {
            Ok(Ok(())) => {
                tracing::debug!(module, %hook, elapsed = ?started.elapsed(), "Hook completed");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!(module, %hook, error = %e, "Hook failed");
                Err(ModuleError::hook(module, hook, HookError::Failed(e)))
            }
            Err(_) => {
                ctx.cancellation_token().cancel();
                tracing::warn!(module, %hook, timeout = ?self.hook_timeout, "Hook timed out");
                Err(ModuleError::hook(
                    module,
                    hook,
                    HookError::TimedOut(self.hook_timeout),
                ))
            }
        }
    }

    /// Persist, then publish state and binding changes in one swap.
    async fn commit<F>(
        &self,
        entry: &ModuleEntry,
        state: ModuleState,
        installed_at: Option<DateTime<Utc>>,
        bindings: F,
    ) -> Result<(), ModuleError>
    where
        F: FnOnce(&mut Snapshot, &Manifest),
    {
        let record = RuntimeRecord {
            module_id: entry.id().to_string(),
            state,
            installed_at,
            updated_at: Utc::now(),
        };
        self.repo
            .save(&record)
            .await
            .map_err(ModuleError::Storage)?;

        self.publish(|s| {
            if !s.registry.contains(entry.id()) {
                if let Err(e) = s.registry.reinstate(entry.clone()) {
                    tracing::error!(module = %entry.id(), error = %e, "Failed to reinstate module");
                }
            }
            s.states.insert(entry.id().to_string(), record);
            bindings(s, entry.manifest.as_ref());
        });
        Ok(())
    }

    /// Read-copy-update under the single writer lock.
    fn publish<R>(&self, mutate: impl FnOnce(&mut Snapshot) -> R) -> R {
        let _writer = self.writer.lock();
        let mut next = Snapshot::clone(&self.snapshot.load());
        let out = mutate(&mut next);
        self.snapshot.store(Arc::new(next));
        out
    }
}

impl CatalogView for LifecycleOrchestrator {
    fn status(&self, module_id: &str) -> Option<CatalogStatus> {
        let snap = self.snapshot.load();
        snap.registry.get(module_id).ok().map(|m| CatalogStatus {
            id: m.id.clone(),
            system_enabled: snap.is_enabled(module_id),
            core: m.core,
        })
    }

    fn active_modules(&self) -> Vec<CatalogStatus> {
        let snap = self.snapshot.load();
        snap.registry
            .all()
            .map(|m| CatalogStatus {
                id: m.id.clone(),
                system_enabled: snap.is_enabled(&m.id),
                core: m.core,
            })
            .collect()
    }
}
