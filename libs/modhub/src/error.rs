use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::registry::RegistryError;
use crate::resolver::ResolveError;
use crate::runtime::ModuleState;

/// Lifecycle step that ran module code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Install,
    Enable,
    Disable,
    Uninstall,
    Router,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Hook::Install => "on_install",
            Hook::Enable => "on_enable",
            Hook::Disable => "on_disable",
            Hook::Uninstall => "on_uninstall",
            Hook::Router => "router",
        })
    }
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("did not complete within {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Every failure the lifecycle and user overlay can report.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("module '{module}' is required by enabled modules: {}", dependents.join(", "))]
    DependentActive {
        module: String,
        dependents: Vec<String>,
    },

    #[error("module '{module}' requires '{dependency}' to be enabled")]
    DependencyUnavailable { module: String, dependency: String },

    #[error("{hook} of module '{module}' failed: {source}")]
    HookFailure {
        module: String,
        hook: Hook,
        #[source]
        source: HookError,
    },

    #[error("module '{0}' is not enabled system-wide")]
    ModuleUnavailable(String),

    #[error("module '{module}' cannot {action} while {state}")]
    InvalidTransition {
        module: String,
        action: &'static str,
        state: ModuleState,
    },

    #[error("module '{module}' requires kernel '{required}', host is {host}")]
    IncompatibleKernel {
        module: String,
        required: String,
        host: String,
    },

    #[error("state persistence failed: {0:#}")]
    Storage(anyhow::Error),
}

/// Coarse classification callers use to render a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Unavailable,
    Invalid,
    Internal,
}

impl ModuleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModuleError::Registry(RegistryError::NotFound(_)) => ErrorKind::NotFound,
            ModuleError::Registry(RegistryError::DuplicateId(_))
            | ModuleError::Registry(RegistryError::DuplicateRoute { .. }) => ErrorKind::Conflict,
            ModuleError::Registry(RegistryError::ManifestValidation { .. }) => ErrorKind::Invalid,
            ModuleError::Resolve(_) => ErrorKind::Invalid,
            ModuleError::DependentActive { .. }
            | ModuleError::DependencyUnavailable { .. }
            | ModuleError::InvalidTransition { .. } => ErrorKind::Conflict,
            ModuleError::ModuleUnavailable(_) => ErrorKind::Unavailable,
            ModuleError::IncompatibleKernel { .. } => ErrorKind::Invalid,
            ModuleError::HookFailure { .. } | ModuleError::Storage(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn not_found(id: &str) -> Self {
        ModuleError::Registry(RegistryError::NotFound(id.to_string()))
    }

    pub(crate) fn hook(module: &str, hook: Hook, source: HookError) -> Self {
        ModuleError::HookFailure {
            module: module.to_string(),
            hook,
            source,
        }
    }
}
