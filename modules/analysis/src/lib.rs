//! Usage figures over the blog. Needs `blog` enabled and is off by default.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use blog::domain::PostStore;
use modhub::{Installable, Manifest, MenuItem, Module, ModuleCtx, RestfulModule};
use serde::Serialize;

pub const MODULE_ID: &str = "analysis";

#[derive(Debug, Default)]
struct Counters {
    views: AtomicU64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Summary {
    pub posts: usize,
    pub summary_views: u64,
}

pub struct AnalysisModule {
    posts: Arc<PostStore>,
    counters: Arc<Counters>,
}

impl AnalysisModule {
    /// Reads the post store of the blog module it depends on.
    pub fn new(posts: Arc<PostStore>) -> Self {
        Self {
            posts,
            counters: Arc::default(),
        }
    }
}

impl Module for AnalysisModule {
    fn manifest(&self) -> Manifest {
        Manifest::new(MODULE_ID, "Analysis", "/analysis")
            .with_description("Blog usage figures")
            .with_icon("chart")
            .with_author("modhub")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_permission("analysis:read")
            .with_dependency(blog::module::MODULE_ID)
            .with_menu(MenuItem::new("Analysis", "/analysis").with_order(90))
            .enabled_by_default(false)
    }

    fn as_installable(&self) -> Option<&dyn Installable> {
        Some(self)
    }

    fn as_restful(&self) -> Option<&dyn RestfulModule> {
        Some(self)
    }
}

#[async_trait]
impl Installable for AnalysisModule {
    async fn on_install(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.counters.views.store(0, Ordering::Relaxed);
        tracing::info!(module = ctx.module_id(), "Analysis counters reset");
        Ok(())
    }
}

#[derive(Clone)]
struct ApiState {
    posts: Arc<PostStore>,
    counters: Arc<Counters>,
}

impl RestfulModule for AnalysisModule {
    fn router(&self, _ctx: &ModuleCtx) -> anyhow::Result<Router> {
        Ok(Router::new()
            .route("/summary", get(summary))
            .with_state(ApiState {
                posts: self.posts.clone(),
                counters: self.counters.clone(),
            }))
    }
}

async fn summary(State(st): State<ApiState>) -> Json<Summary> {
    let views = st.counters.views.fetch_add(1, Ordering::Relaxed) + 1;
    Json(Summary {
        posts: st.posts.len(),
        summary_views: views,
    })
}
