//! Declarative module descriptors.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Immutable identity and capabilities of a module.
///
/// Built once by the module's construction entry point and validated when it is
/// registered. Routers, permissions and menus are opaque to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Stable id, used as foreign key everywhere.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub author: String,
    pub version: String,
    /// Mount point of the module's routes, unique across the registry.
    pub router_prefix: String,
    /// Permission strings contributed by the module, namespaced `<id>:`.
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub menu: Vec<MenuItem>,
    /// Ids that must be enabled before this module activates.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Minimum compatible host version, as a semver requirement.
    pub kernel_version: String,
    /// Activated at boot when true.
    pub enabled: bool,
    /// Pre-provisioned as installed and enabled for every user.
    #[serde(default)]
    pub core: bool,
}

/// One navigation entry of a module's menu tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub title: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub path: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub children: Vec<MenuItem>,
}

impl MenuItem {
    pub fn new(title: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            icon: None,
            path: path.into(),
            order: 0,
            children: Vec::new(),
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_child(mut self, child: MenuItem) -> Self {
        self.children.push(child);
        self
    }
}

impl Manifest {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        router_prefix: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            icon: String::new(),
            author: String::new(),
            version: "0.1.0".to_string(),
            router_prefix: router_prefix.into(),
            permissions: BTreeSet::new(),
            menu: Vec::new(),
            dependencies: BTreeSet::new(),
            kernel_version: "*".to_string(),
            enabled: true,
            core: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_kernel_version(mut self, req: impl Into<String>) -> Self {
        self.kernel_version = req.into();
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    pub fn with_menu(mut self, item: MenuItem) -> Self {
        self.menu.push(item);
        self
    }

    pub fn enabled_by_default(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn core(mut self, core: bool) -> Self {
        self.core = core;
        self
    }

    /// Declared menu order used to break ordering ties: the smallest order of
    /// the top-level menu entries, `0` without a menu.
    pub fn menu_order(&self) -> i32 {
        self.menu.iter().map(|m| m.order).min().unwrap_or(0)
    }

    pub fn depends_on(&self, id: &str) -> bool {
        self.dependencies.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let m = Manifest::new("blog", "Blog", "/blog");
        assert!(m.enabled);
        assert!(!m.core);
        assert_eq!(m.kernel_version, "*");
        assert_eq!(m.menu_order(), 0);
    }

    #[test]
    fn menu_order_is_smallest_top_level_order() {
        let m = Manifest::new("blog", "Blog", "/blog")
            .with_menu(MenuItem::new("Posts", "/blog/posts").with_order(20))
            .with_menu(
                MenuItem::new("Drafts", "/blog/drafts")
                    .with_order(5)
                    .with_child(MenuItem::new("Old", "/blog/drafts/old").with_order(-100)),
            );
        assert_eq!(m.menu_order(), 5);
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = serde_json::json!({
            "id": "notes",
            "name": "Notes",
            "version": "1.2.0",
            "router_prefix": "/notes",
            "kernel_version": ">=0.1",
            "enabled": false
        });
        let m: Manifest = serde_json::from_value(json).unwrap();
        assert!(!m.enabled);
        assert!(m.permissions.is_empty());
        assert!(m.dependencies.is_empty());
    }
}
