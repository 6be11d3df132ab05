// The host's explicit module list. Adding a module means adding its crate to
// Cargo.toml and one line here.

use std::sync::Arc;

use modhub::{ManifestRegistry, Module};

use analysis::AnalysisModule;
use blog::BlogModule;
use notes::NotesModule;

/// Every module shipped with the server, in registration order.
pub fn all_modules() -> Vec<Arc<dyn Module>> {
    let blog = Arc::new(BlogModule::default());
    let analysis = Arc::new(AnalysisModule::new(blog.store().clone()));
    vec![blog, Arc::new(NotesModule::default()), analysis]
}

/// Validate and register all modules; any manifest error is fatal.
pub fn build_registry(permission_exceptions: &[String]) -> anyhow::Result<ManifestRegistry> {
    let mut registry =
        ManifestRegistry::new().with_permission_exceptions(permission_exceptions.iter().cloned());
    for module in all_modules() {
        registry.register_module(module)?;
    }
    tracing::info!(modules = registry.len(), "Module catalog registered");
    Ok(registry)
}
