use std::sync::Arc;

use async_trait::async_trait;
use modhub::{
    Enablable, Installable, Manifest, MenuItem, Module, ModuleCtx, RestfulModule, Uninstallable,
};
use tracing::{debug, info};

use crate::config::BlogConfig;
use crate::domain::PostStore;

pub const MODULE_ID: &str = "blog";

/// Articles with a public listing.
#[derive(Default)]
pub struct BlogModule {
    store: Arc<PostStore>,
}

impl BlogModule {
    pub fn store(&self) -> &Arc<PostStore> {
        &self.store
    }
}

impl Module for BlogModule {
    fn manifest(&self) -> Manifest {
        Manifest::new(MODULE_ID, "Blog", "/blog")
            .with_description("Articles and drafts")
            .with_icon("book")
            .with_author("modhub")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_kernel_version(">=0.1")
            .with_permissions(["blog:read", "blog:write", "blog:admin"])
            .with_menu(
                MenuItem::new("Blog", "/blog")
                    .with_icon("book")
                    .with_order(10)
                    .with_child(MenuItem::new("Posts", "/blog/posts")),
            )
    }

    fn as_installable(&self) -> Option<&dyn Installable> {
        Some(self)
    }

    fn as_enablable(&self) -> Option<&dyn Enablable> {
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
impl Installable for BlogModule {
    async fn on_install(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let cfg: BlogConfig = ctx.config()?;
        if cfg.seed_welcome_post && self.store.is_empty() {
            self.store
                .create("Welcome", "Your blog is ready. Edit or delete this post.");
            debug!("Seeded welcome post");
        }
        info!(module = ctx.module_id(), "Blog installed");
        Ok(())
    }
}

#[async_trait]
impl Enablable for BlogModule {
    async fn on_enable(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let cfg: BlogConfig = ctx.config()?;
        info!(
            module = ctx.module_id(),
            page_size = cfg.page_size,
            posts = self.store.len(),
            "Blog enabled"
        );
        Ok(())
    }
}

#[async_trait]
impl Uninstallable for BlogModule {
    async fn on_uninstall(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let removed = self.store.len();
        self.store.clear();
        info!(module = ctx.module_id(), removed, "Blog data removed");
        Ok(())
    }
}

impl RestfulModule for BlogModule {
    fn router(&self, ctx: &ModuleCtx) -> anyhow::Result<axum::Router> {
        let cfg: BlogConfig = ctx.config()?;
        Ok(crate::api::routes(self.store.clone(), cfg.page_size))
    }
}
