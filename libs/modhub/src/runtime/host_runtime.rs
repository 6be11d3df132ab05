//! Host Runtime - owns the orchestrator, the user overlay and the scheduler
//! and drives the process lifecycle: boot → start → serve → wait → stop.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::admin::AdminApi;
use crate::context::{ConfigProvider, EmptyConfigProvider, ModuleContextBuilder};
use crate::error::ModuleError;
use crate::registry::ManifestRegistry;
use crate::runtime::orchestrator::{BootReport, LifecycleOrchestrator, DEFAULT_HOOK_TIMEOUT};
use crate::runtime::scheduler::PeriodicScheduler;
use crate::runtime::state::ModuleState;
use crate::store::Storage;
use crate::user_state::UserModuleStateStore;

pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(300);

/// Everything the host needs besides the catalog.
pub struct HostOptions {
    /// Provider of module config sections (raw JSON by module id).
    pub modules_cfg: Arc<dyn ConfigProvider>,
    pub storage: Storage,
    pub hook_timeout: Duration,
    /// Per-module overrides of the default `enabled` flag.
    pub overrides: HashMap<String, bool>,
    pub stats_interval: Duration,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            modules_cfg: Arc::new(EmptyConfigProvider),
            storage: Storage::in_memory(),
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
            overrides: HashMap::new(),
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }
}

pub struct HostRuntime {
    orchestrator: Arc<LifecycleOrchestrator>,
    users: Arc<UserModuleStateStore>,
    scheduler: PeriodicScheduler,
    cancel: CancellationToken,
    stats_interval: Duration,
}

impl HostRuntime {
    /// Prepare all runtime components; nothing is activated yet.
    pub fn new(registry: ManifestRegistry, opts: HostOptions, cancel: CancellationToken) -> Self {
        let contexts = ModuleContextBuilder::new(opts.modules_cfg, cancel.clone());

        let orchestrator = opts.overrides.into_iter().fold(
            LifecycleOrchestrator::new(registry)
                .with_repository(opts.storage.runtime)
                .with_contexts(contexts)
                .with_hook_timeout(opts.hook_timeout),
            |o, (id, enabled)| o.with_enabled_override(id, enabled),
        );
        let orchestrator = Arc::new(orchestrator);

        let users = Arc::new(UserModuleStateStore::new(
            orchestrator.clone(),
            opts.storage.users,
        ));

        Self {
            orchestrator,
            users,
            scheduler: PeriodicScheduler::new(&cancel),
            cancel,
            stats_interval: opts.stats_interval,
        }
    }

    pub fn orchestrator(&self) -> &Arc<LifecycleOrchestrator> {
        &self.orchestrator
    }

    pub fn users(&self) -> &Arc<UserModuleStateStore> {
        &self.users
    }

    pub fn scheduler(&self) -> &PeriodicScheduler {
        &self.scheduler
    }

    pub fn admin(&self) -> AdminApi {
        AdminApi::new(self.orchestrator.clone(), self.users.clone())
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// BOOT phase: restore persisted state and activate modules in order.
    pub async fn boot(&self) -> Result<BootReport, ModuleError> {
        tracing::info!("Phase: boot");
        self.orchestrator.boot().await
    }

    /// START phase: background jobs.
    pub fn start(&self) {
        tracing::info!("Phase: start");
        let orchestrator = self.orchestrator.clone();
        self.scheduler
            .register("catalog-stats", self.stats_interval, move || {
                let snap = orchestrator.snapshot();
                async move {
                    let counts = snap.state_counts();
                    let count = |s: ModuleState| counts.get(&s).copied().unwrap_or(0);
                    tracing::info!(
                        modules = snap.registry().len(),
                        enabled = count(ModuleState::Enabled),
                        disabled = count(ModuleState::Disabled),
                        installed = count(ModuleState::Installed),
                        discovered = count(ModuleState::Discovered),
                        routes = snap.bindings().mounted_prefixes().count(),
                        permissions = snap.bindings().permissions().count(),
                        "Module catalog stats"
                    );
                    Ok(())
                }
            });
        self.scheduler.start();
    }

    /// STOP phase: background jobs are joined; module state stays as persisted.
    pub async fn stop(&self) {
        tracing::info!("Phase: stop");
        self.scheduler.shutdown().await;
    }

    /// Full cycle: boot → start → serve → wait → stop.
    ///
    /// `serve` receives the root token and should return once it is cancelled.
    pub async fn run_full_cycle<F, Fut>(&self, serve: F) -> anyhow::Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let report = self.boot().await?;
        for (id, err) in report.failed() {
            tracing::warn!(module = %id, error = %err, "Module left inactive");
        }
        self.start();

        let served = serve(self.cancel.clone()).await;
        if let Err(e) = &served {
            tracing::error!(error = %e, "Serving ended with error");
            self.cancel.cancel();
        }
        self.cancel.cancelled().await;

        self.stop().await;
        served
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;

    #[tokio::test]
    async fn full_cycle_boots_serves_and_stops() {
        let mut reg = ManifestRegistry::new();
        reg.register(Manifest::new("blog", "Blog", "/blog")).unwrap();
        reg.register(
            Manifest::new("analysis", "Analysis", "/analysis")
                .with_dependency("blog")
                .enabled_by_default(false),
        )
        .unwrap();

        let opts = HostOptions {
            overrides: HashMap::from([("analysis".to_string(), true)]),
            ..Default::default()
        };
        let host = HostRuntime::new(reg, opts, CancellationToken::new());

        let orch = host.orchestrator().clone();
        host.run_full_cycle(|cancel| async move {
            assert!(orch.is_enabled("blog"));
            assert!(orch.is_enabled("analysis"));
            cancel.cancel();
            Ok(())
        })
        .await
        .unwrap();

        assert!(host.cancellation_token().is_cancelled());
        assert_eq!(host.scheduler().job_names(), vec!["catalog-stats"]);
    }
}
