use async_trait::async_trait;
use axum::Router;

use crate::context::ModuleCtx;
use crate::manifest::Manifest;

/// A pluggable feature module.
///
/// `manifest()` is the single construction entry point the host calls at boot.
/// Lifecycle capabilities are optional: a module only overrides the accessors
/// for the capabilities it implements, everything else is a no-op.
pub trait Module: Send + Sync + 'static {
    fn manifest(&self) -> Manifest;

    fn as_installable(&self) -> Option<&dyn Installable> {
        None
    }

    fn as_enablable(&self) -> Option<&dyn Enablable> {
        None
    }

    fn as_disablable(&self) -> Option<&dyn Disablable> {
        None
    }

    fn as_uninstallable(&self) -> Option<&dyn Uninstallable> {
        None
    }

    fn as_restful(&self) -> Option<&dyn RestfulModule> {
        None
    }
}

/// Runs once, the first time the module is activated (or after an uninstall).
#[async_trait]
pub trait Installable: Send + Sync {
    async fn on_install(&self, ctx: &ModuleCtx) -> anyhow::Result<()>;
}

/// Runs on every transition into `Enabled`, including at boot.
#[async_trait]
pub trait Enablable: Send + Sync {
    async fn on_enable(&self, ctx: &ModuleCtx) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Disablable: Send + Sync {
    async fn on_disable(&self, ctx: &ModuleCtx) -> anyhow::Result<()>;
}

/// Cleanup of module-owned data; the host never touches business tables.
#[async_trait]
pub trait Uninstallable: Send + Sync {
    async fn on_uninstall(&self, ctx: &ModuleCtx) -> anyhow::Result<()>;
}

/// Pure wiring; must be sync. Builds the route table mounted under the
/// manifest's `router_prefix`, with paths relative to that prefix.
pub trait RestfulModule: Send + Sync {
    fn router(&self, ctx: &ModuleCtx) -> anyhow::Result<Router>;
}

/// A module made of a manifest only: no hooks, no routes.
#[derive(Debug, Clone)]
pub struct ManifestOnly(pub Manifest);

impl Module for ManifestOnly {
    fn manifest(&self) -> Manifest {
        self.0.clone()
    }
}
