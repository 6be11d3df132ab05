use std::sync::Arc;

use async_trait::async_trait;
use modhub::{Disablable, Enablable, Manifest, MenuItem, Module, ModuleCtx, RestfulModule};
use tracing::info;

use crate::api::NoteBook;

pub const MODULE_ID: &str = "notes";

/// Private per-user notes; provisioned for every user.
#[derive(Default)]
pub struct NotesModule {
    book: Arc<NoteBook>,
}

impl Module for NotesModule {
    fn manifest(&self) -> Manifest {
        Manifest::new(MODULE_ID, "Notes", "/notes")
            .with_description("Private notes")
            .with_icon("note")
            .with_author("modhub")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_permissions(["notes:read", "notes:write"])
            .with_menu(MenuItem::new("Notes", "/notes").with_icon("note"))
            .core(true)
    }

    fn as_enablable(&self) -> Option<&dyn Enablable> {
        Some(self)
    }

    fn as_disablable(&self) -> Option<&dyn Disablable> {
        Some(self)
    }

    fn as_restful(&self) -> Option<&dyn RestfulModule> {
        Some(self)
    }
}

#[async_trait]
impl Enablable for NotesModule {
    async fn on_enable(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        info!(module = ctx.module_id(), users = self.book.user_count(), "Notes enabled");
        Ok(())
    }
}

#[async_trait]
impl Disablable for NotesModule {
    async fn on_disable(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        // notes are kept; only the routes go away
        info!(module = ctx.module_id(), "Notes disabled");
        Ok(())
    }
}

impl RestfulModule for NotesModule {
    fn router(&self, _ctx: &ModuleCtx) -> anyhow::Result<axum::Router> {
        Ok(crate::api::routes(self.book.clone()))
    }
}
