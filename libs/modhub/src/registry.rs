//! Catalog of registered module manifests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

use crate::contracts::{ManifestOnly, Module};
use crate::manifest::Manifest;

/// A registered module: its validated manifest and its capabilities.
#[derive(Clone)]
pub struct ModuleEntry {
    pub manifest: Arc<Manifest>,
    pub module: Arc<dyn Module>,
}

impl ModuleEntry {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }
}

impl std::fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("id", &self.manifest.id)
            .field("router_prefix", &self.manifest.router_prefix)
            .field("deps", &self.manifest.dependencies)
            .field("has_install", &self.module.as_installable().is_some())
            .field("has_enable", &self.module.as_enablable().is_some())
            .field("has_disable", &self.module.as_disablable().is_some())
            .field("has_uninstall", &self.module.as_uninstallable().is_some())
            .field("has_rest", &self.module.as_restful().is_some())
            .finish()
    }
}

/// Structured errors for the manifest catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("invalid manifest '{id}': {reason}")]
    ManifestValidation { id: String, reason: String },
    #[error("module '{0}' is already registered")]
    DuplicateId(String),
    #[error("router prefix '{prefix}' of module '{id}' is already used by '{existing}'")]
    DuplicateRoute {
        prefix: String,
        existing: String,
        id: String,
    },
    #[error("unknown module '{0}'")]
    NotFound(String),
}

/// In-memory catalog, kept in registration order.
///
/// Every manifest is validated when it is registered; nothing is deferred.
/// The registry is plain data: the orchestrator owns it and publishes
/// snapshots of it to readers.
#[derive(Clone, Default)]
pub struct ManifestRegistry {
    entries: Vec<ModuleEntry>,
    by_id: HashMap<String, usize>,
    by_prefix: HashMap<String, String>,
    permission_exceptions: Arc<HashSet<String>>,
}

impl std::fmt::Debug for ManifestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.entries.iter().map(|e| e.id()).collect();
        f.debug_struct("ManifestRegistry")
            .field("modules", &ids)
            .field("permission_exceptions", &self.permission_exceptions.len())
            .finish()
    }
}

impl ManifestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permissions that may live outside the `<id>:` namespace.
    pub fn with_permission_exceptions<I, S>(mut self, exceptions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permission_exceptions = Arc::new(exceptions.into_iter().map(Into::into).collect());
        self
    }

    /// Register a manifest without lifecycle capabilities.
    pub fn register(&mut self, manifest: Manifest) -> Result<(), RegistryError> {
        let module = Arc::new(ManifestOnly(manifest.clone()));
        self.insert(manifest, module)
    }

    /// Register a module through its construction entry point.
    pub fn register_module(&mut self, module: Arc<dyn Module>) -> Result<(), RegistryError> {
        let manifest = module.manifest();
        self.insert(manifest, module)
    }

    fn insert(&mut self, manifest: Manifest, module: Arc<dyn Module>) -> Result<(), RegistryError> {
        self.validate(&manifest)?;
        let manifest = Arc::new(manifest);
        self.reinstate(ModuleEntry {
            manifest: manifest.clone(),
            module,
        })?;
        tracing::debug!(module = %manifest.id, prefix = %manifest.router_prefix, "Manifest registered");
        Ok(())
    }

    /// Structural checks performed at registration time.
    pub fn validate(&self, manifest: &Manifest) -> Result<(), RegistryError> {
        let invalid = |reason: String| RegistryError::ManifestValidation {
            id: manifest.id.clone(),
            reason,
        };

        if !is_valid_id(&manifest.id) {
            return Err(invalid(
                "id must be non-empty lowercase [a-z][a-z0-9_]*".to_string(),
            ));
        }
        if manifest.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if !is_valid_prefix(&manifest.router_prefix) {
            return Err(invalid(format!(
                "router prefix '{}' must look like '/segment[/segment...]'",
                manifest.router_prefix
            )));
        }

        let namespace = format!("{}:", manifest.id);
        if let Some(bad) = manifest.permissions.iter().find(|p| {
            let namespaced = p.len() > namespace.len() && p.starts_with(&namespace);
            !namespaced && !self.permission_exceptions.contains(p.as_str())
        }) {
            return Err(invalid(format!(
                "permission '{bad}' is not namespaced by '{namespace}'"
            )));
        }

        if let Err(e) = semver::VersionReq::parse(&manifest.kernel_version) {
            return Err(invalid(format!(
                "kernel version '{}' is not a semver requirement: {e}",
                manifest.kernel_version
            )));
        }

        if manifest.depends_on(&manifest.id) {
            return Err(invalid("module depends on itself".to_string()));
        }

        Ok(())
    }

    /// Manifests in registration order. Each call starts a fresh pass.
    pub fn all(&self) -> impl Iterator<Item = &Arc<Manifest>> + Clone + '_ {
        self.entries.iter().map(|e| &e.manifest)
    }

    pub fn entries(&self) -> &[ModuleEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Result<&Arc<Manifest>, RegistryError> {
        self.entry(id).map(|e| &e.manifest)
    }

    pub fn entry(&self, id: &str) -> Result<&ModuleEntry, RegistryError> {
        self.by_id
            .get(id)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of registered modules that declare `id` as a dependency.
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.manifest.depends_on(id))
            .map(|e| e.id())
            .collect()
    }

    /// Put an already validated entry back into the catalog after an uninstall.
    pub(crate) fn reinstate(&mut self, entry: ModuleEntry) -> Result<(), RegistryError> {
        if self.by_id.contains_key(entry.id()) {
            return Err(RegistryError::DuplicateId(entry.id().to_string()));
        }
        if let Some(existing) = self.by_prefix.get(&entry.manifest.router_prefix) {
            return Err(RegistryError::DuplicateRoute {
                prefix: entry.manifest.router_prefix.clone(),
                existing: existing.clone(),
                id: entry.id().to_string(),
            });
        }
        self.by_id.insert(entry.id().to_string(), self.entries.len());
        self.by_prefix
            .insert(entry.manifest.router_prefix.clone(), entry.id().to_string());
        self.entries.push(entry);
        Ok(())
    }

    /// Drop a module from the active catalog, keeping registration order.
    pub(crate) fn remove(&mut self, id: &str) -> Option<ModuleEntry> {
        let idx = self.by_id.remove(id)?;
        let entry = self.entries.remove(idx);
        self.by_prefix.remove(&entry.manifest.router_prefix);
        for (i, e) in self.entries.iter().enumerate().skip(idx) {
            self.by_id.insert(e.manifest.id.clone(), i);
        }
        Some(entry)
    }
}

fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn is_valid_prefix(prefix: &str) -> bool {
    let Some(rest) = prefix.strip_prefix('/') else {
        return false;
    };
    !rest.is_empty()
        && rest.split('/').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit())
                && chars.all(|c| {
                    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'
                })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str, prefix: &str) -> Manifest {
        Manifest::new(id, id.to_uppercase(), prefix)
    }

    #[test]
    fn registers_in_order_and_iterates_repeatedly() {
        let mut reg = ManifestRegistry::new();
        reg.register(manifest("blog", "/blog")).unwrap();
        reg.register(manifest("notes", "/notes")).unwrap();
        reg.register(manifest("analysis", "/analysis")).unwrap();

        let all = reg.all();
        let first: Vec<_> = all.clone().map(|m| m.id.as_str()).collect();
        let second: Vec<_> = all.map(|m| m.id.as_str()).collect();
        assert_eq!(first, vec!["blog", "notes", "analysis"]);
        assert_eq!(first, second);
        assert_eq!(reg.get("notes").unwrap().router_prefix, "/notes");
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut reg = ManifestRegistry::new();
        reg.register(manifest("blog", "/blog")).unwrap();
        let err = reg.register(manifest("blog", "/blog2")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId("blog".into()));
    }

    #[test]
    fn duplicate_route_rejected() {
        let mut reg = ManifestRegistry::new();
        reg.register(manifest("blog", "/content")).unwrap();
        let err = reg.register(manifest("notes", "/content")).unwrap_err();
        match err {
            RegistryError::DuplicateRoute {
                prefix,
                existing,
                id,
            } => {
                assert_eq!(prefix, "/content");
                assert_eq!(existing, "blog");
                assert_eq!(id, "notes");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn get_unknown_is_not_found() {
        let reg = ManifestRegistry::new();
        assert_eq!(
            reg.get("ghost").unwrap_err(),
            RegistryError::NotFound("ghost".into())
        );
    }

    #[test]
    fn structural_validation() {
        let reg = ManifestRegistry::new();
        let cases = [
            manifest("", "/x"),
            manifest("Blog", "/blog"),
            Manifest::new("blog", "  ", "/blog"),
            manifest("blog", "blog"),
            manifest("blog", "/"),
            manifest("blog", "/blog/"),
            manifest("blog", "/blog//posts"),
            manifest("blog", "/Blog"),
            manifest("blog", "/blog").with_permission("notes:read"),
            manifest("blog", "/blog").with_permission("blog:"),
            manifest("blog", "/blog").with_kernel_version("not a version"),
            manifest("blog", "/blog").with_dependency("blog"),
        ];
        for m in cases {
            let err = reg.validate(&m).unwrap_err();
            assert!(
                matches!(err, RegistryError::ManifestValidation { .. }),
                "expected validation error for {m:?}, got {err:?}"
            );
        }

        let ok = manifest("blog", "/api/blog-v2")
            .with_permissions(["blog:read", "blog:write"])
            .with_kernel_version(">=0.1, <2");
        assert!(reg.validate(&ok).is_ok());
    }

    #[test]
    fn permission_exceptions_are_allowed() {
        let mut reg = ManifestRegistry::new().with_permission_exceptions(["admin:audit"]);
        reg.register(manifest("blog", "/blog").with_permission("admin:audit"))
            .unwrap();
        assert!(reg.get("blog").unwrap().permissions.contains("admin:audit"));
    }

    #[test]
    fn remove_keeps_indexes_consistent() {
        let mut reg = ManifestRegistry::new();
        reg.register(manifest("a", "/a")).unwrap();
        reg.register(manifest("b", "/b").with_dependency("a")).unwrap();
        reg.register(manifest("c", "/c").with_dependency("a")).unwrap();

        assert_eq!(reg.dependents_of("a"), vec!["b", "c"]);

        let removed = reg.remove("b").unwrap();
        assert_eq!(removed.id(), "b");
        assert_eq!(reg.get("c").unwrap().id, "c");
        assert!(reg.get("b").is_err());
        assert_eq!(reg.dependents_of("a"), vec!["c"]);

        // prefix is free again
        reg.register(manifest("b2", "/b")).unwrap();
    }
}
