//! Configurable test module shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use modhub::{
    Disablable, Enablable, Installable, Manifest, ManifestRegistry, Module, ModuleCtx,
    RestfulModule, Uninstallable,
};

/// Shared, ordered record of hook invocations (`"install:a"`, `"enable:b"`, ...).
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub struct TestModule {
    manifest: Manifest,
    calls: CallLog,
    fail_install: bool,
    fail_disable: bool,
    hang_install: bool,
    hang_enable: bool,
    seen_tokens: Arc<Mutex<Vec<CancellationToken>>>,
}

impl TestModule {
    pub fn new(manifest: Manifest, calls: CallLog) -> Self {
        Self {
            manifest,
            calls,
            fail_install: false,
            fail_disable: false,
            hang_install: false,
            hang_enable: false,
            seen_tokens: Arc::default(),
        }
    }

    pub fn failing_install(mut self) -> Self {
        self.fail_install = true;
        self
    }

    pub fn failing_disable(mut self) -> Self {
        self.fail_disable = true;
        self
    }

    pub fn hanging_install(mut self) -> Self {
        self.hang_install = true;
        self
    }

    pub fn hanging_enable(mut self) -> Self {
        self.hang_enable = true;
        self
    }

    pub fn tokens(&self) -> Arc<Mutex<Vec<CancellationToken>>> {
        self.seen_tokens.clone()
    }

    fn record(&self, hook: &str) {
        self.calls.lock().push(format!("{hook}:{}", self.manifest.id));
    }
}

impl Module for TestModule {
    fn manifest(&self) -> Manifest {
        self.manifest.clone()
    }
    fn as_installable(&self) -> Option<&dyn Installable> {
        Some(self)
    }
    fn as_enablable(&self) -> Option<&dyn Enablable> {
        Some(self)
    }
    fn as_disablable(&self) -> Option<&dyn Disablable> {
        Some(self)
    }
    fn as_uninstallable(&self) -> Option<&dyn Uninstallable> {
        Some(self)
    }
    fn as_restful(&self) -> Option<&dyn RestfulModule> {
        Some(self)
    }
}

#[async_trait]
impl Installable for TestModule {
    async fn on_install(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.seen_tokens.lock().push(ctx.cancellation_token().clone());
        if self.hang_install {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_install {
            anyhow::bail!("install of {} refused", self.manifest.id);
        }
        self.record("install");
        Ok(())
    }
}

#[async_trait]
impl Enablable for TestModule {
    async fn on_enable(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        if self.hang_enable {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.record("enable");
        Ok(())
    }
}

#[async_trait]
impl Disablable for TestModule {
    async fn on_disable(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        if self.fail_disable {
            anyhow::bail!("disable of {} refused", self.manifest.id);
        }
        self.record("disable");
        Ok(())
    }
}

#[async_trait]
impl Uninstallable for TestModule {
    async fn on_uninstall(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.record("uninstall");
        Ok(())
    }
}

impl RestfulModule for TestModule {
    fn router(&self, _ctx: &ModuleCtx) -> anyhow::Result<Router> {
        let id = self.manifest.id.clone();
        Ok(Router::new().route("/ping", get(move || async move { format!("pong from {id}") })))
    }
}

/// Manifest with the usual namespaced permissions.
pub fn manifest(id: &str, deps: &[&str]) -> Manifest {
    deps.iter().fold(
        Manifest::new(id, id.to_uppercase(), format!("/{id}"))
            .with_permissions([format!("{id}:read"), format!("{id}:write")]),
        |m, d| m.with_dependency(*d),
    )
}

pub fn registry(modules: Vec<TestModule>) -> ManifestRegistry {
    let mut reg = ManifestRegistry::new();
    for m in modules {
        reg.register_module(Arc::new(m)).unwrap();
    }
    reg
}

pub fn calls_of(log: &CallLog, hook: &str) -> Vec<String> {
    let prefix = format!("{hook}:");
    log.lock()
        .iter()
        .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
        .collect()
}
