use crate::config::AppConfig;
use std::sync::Arc;

/// Shared handle the host hands to module contexts; only the `modules` bag is
/// visible through it.
#[derive(Clone)]
pub struct AppConfigProvider(Arc<AppConfig>);

impl AppConfigProvider {
    pub fn new(config: AppConfig) -> Self {
        Self(Arc::new(config))
    }

    /// Section stored under `modules.<module_id>`, if any.
    pub fn get_module_config(&self, module_id: &str) -> Option<&serde_json::Value> {
        self.0.modules.get(module_id)
    }
}
