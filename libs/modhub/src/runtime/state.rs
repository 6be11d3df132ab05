//! System-wide lifecycle state and the published snapshot.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::binding::Bindings;
use crate::registry::ManifestRegistry;

/// `Discovered -> Installed -> Enabled <-> Disabled -> Uninstalled`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Discovered,
    Installed,
    Enabled,
    Disabled,
    Uninstalled,
}

impl ModuleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleState::Discovered => "discovered",
            ModuleState::Installed => "installed",
            ModuleState::Enabled => "enabled",
            ModuleState::Disabled => "disabled",
            ModuleState::Uninstalled => "uninstalled",
        }
    }

    /// True once `on_install` has completed and the module was not uninstalled since.
    pub fn is_installed(&self) -> bool {
        matches!(
            self,
            ModuleState::Installed | ModuleState::Enabled | ModuleState::Disabled
        )
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown module state '{0}'")]
pub struct ParseStateError(pub String);

impl FromStr for ModuleState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovered" => Ok(ModuleState::Discovered),
            "installed" => Ok(ModuleState::Installed),
            "enabled" => Ok(ModuleState::Enabled),
            "disabled" => Ok(ModuleState::Disabled),
            "uninstalled" => Ok(ModuleState::Uninstalled),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

/// One row of the durable runtime-state table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeRecord {
    pub module_id: String,
    pub state: ModuleState,
    pub installed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl RuntimeRecord {
    pub fn discovered(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            state: ModuleState::Discovered,
            installed_at: None,
            updated_at: Utc::now(),
        }
    }
}

/// Immutable view published by the orchestrator after each commit.
///
/// Catalog, states and bindings always change together, so a reader never
/// sees a `Disabled` module that is still mounted.
#[derive(Clone, Default)]
pub struct Snapshot {
    pub(crate) registry: ManifestRegistry,
    pub(crate) states: HashMap<String, RuntimeRecord>,
    pub(crate) bindings: Bindings,
}

impl Snapshot {
    pub(crate) fn new(registry: ManifestRegistry) -> Self {
        let states = registry
            .all()
            .map(|m| (m.id.clone(), RuntimeRecord::discovered(m.id.clone())))
            .collect();
        Self {
            registry,
            states,
            bindings: Bindings::default(),
        }
    }

    pub fn registry(&self) -> &ManifestRegistry {
        &self.registry
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn record(&self, id: &str) -> Option<&RuntimeRecord> {
        self.states.get(id)
    }

    pub fn state_of(&self, id: &str) -> Option<ModuleState> {
        self.states.get(id).map(|r| r.state)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.state_of(id) == Some(ModuleState::Enabled)
    }

    /// Number of active modules per state.
    pub fn state_counts(&self) -> HashMap<ModuleState, usize> {
        let mut counts = HashMap::new();
        for record in self.states.values() {
            *counts.entry(record.state).or_insert(0) += 1;
        }
        counts
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("registry", &self.registry)
            .field("states", &self.states.len())
            .field("bindings", &self.bindings)
            .finish()
    }
}
