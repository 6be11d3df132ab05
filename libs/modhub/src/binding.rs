//! Permission and route exports of enabled modules.
//!
//! [`Bindings`] lives inside the orchestrator's [`Snapshot`], so binding and
//! unbinding are published in the same atomic swap as the state change.
//! [`PermissionRegistrar`] and [`RouteBinder`] are the read handles handed to
//! the authorization layer and to the HTTP dispatcher.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::Router;

use crate::manifest::Manifest;
use crate::runtime::Snapshot;

#[derive(Clone)]
struct BoundRoute {
    module: String,
    router: Router,
}

/// Permission owners and mounted routers of currently enabled modules.
#[derive(Clone, Default)]
pub struct Bindings {
    routes: BTreeMap<String, BoundRoute>,
    permissions: BTreeMap<String, BTreeSet<String>>,
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bindings")
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .field("permissions", &self.permissions.len())
            .finish()
    }
}

impl Bindings {
    pub(crate) fn bind(&mut self, manifest: &Manifest, router: Option<Router>) {
        if let Some(router) = router {
            self.routes.insert(
                manifest.router_prefix.clone(),
                BoundRoute {
                    module: manifest.id.clone(),
                    router,
                },
            );
        }
        for perm in &manifest.permissions {
            self.permissions
                .entry(perm.clone())
                .or_default()
                .insert(manifest.id.clone());
        }
    }

    pub(crate) fn unbind(&mut self, manifest: &Manifest) {
        self.routes.retain(|_, r| r.module != manifest.id);
        self.permissions.retain(|_, owners| {
            owners.remove(&manifest.id);
            !owners.is_empty()
        });
    }

    /// A permission stays grantable while at least one owning module is enabled.
    pub fn is_grantable(&self, permission: &str) -> bool {
        self.permissions.contains_key(permission)
    }

    pub fn permissions(&self) -> impl Iterator<Item = &str> + '_ {
        self.permissions.keys().map(String::as_str)
    }

    pub fn permissions_of(&self, module_id: &str) -> BTreeSet<String> {
        self.permissions
            .iter()
            .filter(|(_, owners)| owners.contains(module_id))
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn mounted_prefixes(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.routes
            .iter()
            .map(|(prefix, r)| (prefix.as_str(), r.module.as_str()))
    }

    /// Longest mounted prefix that owns `path`.
    pub fn route_for(&self, path: &str) -> Option<RouteMatch> {
        self.routes
            .iter()
            .filter(|(prefix, _)| owns_path(prefix, path))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, bound)| {
                let rest = &path[prefix.len()..];
                RouteMatch {
                    module_id: bound.module.clone(),
                    prefix: prefix.clone(),
                    path: if rest.is_empty() { "/".to_string() } else { rest.to_string() },
                    router: bound.router.clone(),
                }
            })
    }
}

fn owns_path(prefix: &str, path: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Result of a route lookup; `path` is relative to the module's prefix.
#[derive(Clone)]
pub struct RouteMatch {
    pub module_id: String,
    pub prefix: String,
    pub path: String,
    pub router: Router,
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch")
            .field("module_id", &self.module_id)
            .field("prefix", &self.prefix)
            .field("path", &self.path)
            .finish()
    }
}

/// Lock-free view of grantable permissions for the authorization layer.
#[derive(Clone)]
pub struct PermissionRegistrar {
    snapshot: Arc<ArcSwap<Snapshot>>,
}

impl PermissionRegistrar {
    pub(crate) fn new(snapshot: Arc<ArcSwap<Snapshot>>) -> Self {
        Self { snapshot }
    }

    pub fn is_grantable(&self, permission: &str) -> bool {
        self.snapshot.load().bindings.is_grantable(permission)
    }

    pub fn grantable(&self) -> BTreeSet<String> {
        self.snapshot
            .load()
            .bindings
            .permissions()
            .map(str::to_string)
            .collect()
    }

    pub fn permissions_of(&self, module_id: &str) -> BTreeSet<String> {
        self.snapshot.load().bindings.permissions_of(module_id)
    }
}

/// Lock-free route lookup for the HTTP mounting layer.
#[derive(Clone)]
pub struct RouteBinder {
    snapshot: Arc<ArcSwap<Snapshot>>,
}

impl RouteBinder {
    pub(crate) fn new(snapshot: Arc<ArcSwap<Snapshot>>) -> Self {
        Self { snapshot }
    }

    pub fn resolve(&self, path: &str) -> Option<RouteMatch> {
        self.snapshot.load().bindings.route_for(path)
    }

    pub fn is_mounted(&self, prefix: &str) -> bool {
        self.snapshot
            .load()
            .bindings
            .mounted_prefixes()
            .any(|(p, _)| p == prefix)
    }

    /// `(prefix, module id)` pairs, sorted by prefix.
    pub fn mounted(&self) -> Vec<(String, String)> {
        self.snapshot
            .load()
            .bindings
            .mounted_prefixes()
            .map(|(p, m)| (p.to_string(), m.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str, prefix: &str, perms: &[&str]) -> Manifest {
        Manifest::new(id, id, prefix).with_permissions(perms.iter().copied())
    }

    #[test]
    fn bind_then_unbind_is_clean() {
        let blog = manifest("blog", "/blog", &["blog:read", "blog:write"]);
        let mut b = Bindings::default();
        b.bind(&blog, Some(Router::new()));

        assert!(b.is_grantable("blog:read"));
        assert!(b.route_for("/blog/posts").is_some());

        b.unbind(&blog);
        assert!(!b.is_grantable("blog:read"));
        assert!(!b.is_grantable("blog:write"));
        assert!(b.route_for("/blog/posts").is_none());
        assert_eq!(b.permissions().count(), 0);
    }

    #[test]
    fn shared_permission_survives_until_last_owner_unbinds() {
        let blog = manifest("blog", "/blog", &["audit:view"]);
        let notes = manifest("notes", "/notes", &["audit:view"]);
        let mut b = Bindings::default();
        b.bind(&blog, None);
        b.bind(&notes, None);

        b.unbind(&blog);
        assert!(b.is_grantable("audit:view"));
        b.unbind(&notes);
        assert!(!b.is_grantable("audit:view"));
    }

    #[test]
    fn longest_prefix_wins_and_path_is_relative() {
        let api = manifest("api", "/api", &[]);
        let blog = manifest("blog", "/api/blog", &[]);
        let mut b = Bindings::default();
        b.bind(&api, Some(Router::new()));
        b.bind(&blog, Some(Router::new()));

        let m = b.route_for("/api/blog/posts/1").unwrap();
        assert_eq!(m.module_id, "blog");
        assert_eq!(m.path, "/posts/1");

        let m = b.route_for("/api/blog").unwrap();
        assert_eq!(m.module_id, "blog");
        assert_eq!(m.path, "/");

        let m = b.route_for("/api/blogroll").unwrap();
        assert_eq!(m.module_id, "api");
        assert_eq!(m.path, "/blogroll");

        assert!(b.route_for("/apix").is_none());
    }
}
