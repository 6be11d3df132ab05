//! # ModHub - Multi-tenant Module Host
//!
//! Registry and lifecycle orchestration for independently pluggable feature
//! modules.
//!
//! ## Features
//!
//! - **Explicit registration**: the host lists its modules; each exposes one
//!   construction entry point returning its [`Manifest`]
//! - **Ordered activation**: dependencies are resolved into a deterministic
//!   topological order, cycles and unknown ids fail the boot
//! - **Capability hooks**: `Installable`, `Enablable`, `Disablable`,
//!   `Uninstallable` and `RestfulModule` are optional; absent means no-op
//! - **Clean unbind**: routes and permissions disappear in the same atomic
//!   snapshot swap that marks a module `Disabled`
//! - **User overlay**: per-user install/enable flags on top of system state
//!
//! ## Basic Module Example
//!
//! ```rust,ignore
//! use modhub::{async_trait, Enablable, Manifest, Module, ModuleCtx};
//!
//! pub struct Notes;
//!
//! impl Module for Notes {
//!     fn manifest(&self) -> Manifest {
//!         Manifest::new("notes", "Notes", "/notes")
//!             .with_permissions(["notes:read", "notes:write"])
//!             .core(true)
//!     }
//!
//!     fn as_enablable(&self) -> Option<&dyn Enablable> {
//!         Some(self)
//!     }
//! }
//!
//! #[async_trait]
//! impl Enablable for Notes {
//!     async fn on_enable(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
//!         tracing::info!(module = ctx.module_id(), "notes ready");
//!         Ok(())
//!     }
//! }
//! ```

pub use anyhow::Result;
pub use async_trait::async_trait;

// Module system exports
pub mod contracts;
pub use crate::contracts::*;
pub mod context;
pub use context::{
    module_config_typed, ConfigError, ConfigProvider, EmptyConfigProvider, ModuleContextBuilder,
    ModuleCtx,
};
pub mod manifest;
pub use manifest::{Manifest, MenuItem};

// Catalog and ordering
pub mod registry;
pub mod resolver;
pub use registry::{ManifestRegistry, ModuleEntry, RegistryError};
pub use resolver::{DependencyResolver, ResolveError};

// Errors
pub mod error;
pub use error::{ErrorKind, Hook, HookError, ModuleError};

// Exports of enabled modules
pub mod binding;
pub use binding::{Bindings, PermissionRegistrar, RouteBinder, RouteMatch};

// Per-user overlay and persistence
pub mod store;
pub mod user_state;
pub use store::{RuntimeStateRepository, Storage, StorageOptions, UserStateRepository};
pub use user_state::{
    CatalogStatus, CatalogView, EffectiveState, UserModuleEntry, UserModuleState,
    UserModuleStateStore,
};

// Administrative facade
pub mod admin;
pub use admin::{AdminApi, AuditView, ModuleView};

pub mod runtime;
pub use runtime::{
    shutdown_token, BootOutcome, BootReport, HostOptions, HostRuntime, KernelCompat,
    LifecycleOrchestrator, ModuleState, PeriodicScheduler, SemverCompat, ShutdownOptions,
};
