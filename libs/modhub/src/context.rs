//! Per-module context handed to lifecycle hooks.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

/// Source of per-module configuration sections (raw JSON keyed by module id).
pub trait ConfigProvider: Send + Sync {
    fn get_module_config(&self, module_id: &str) -> Option<&serde_json::Value>;
}

/// Provider with no sections; every module gets its defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyConfigProvider;

impl ConfigProvider for EmptyConfigProvider {
    fn get_module_config(&self, _module_id: &str) -> Option<&serde_json::Value> {
        None
    }
}

impl ConfigProvider for modhub_bootstrap::AppConfigProvider {
    fn get_module_config(&self, module_id: &str) -> Option<&serde_json::Value> {
        modhub_bootstrap::AppConfigProvider::get_module_config(self, module_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration for module '{module}'")]
    Invalid {
        module: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Deserialize a module's section, falling back to `T::default()` when absent.
pub fn module_config_typed<T: DeserializeOwned + Default>(
    provider: &dyn ConfigProvider,
    module_id: &str,
) -> Result<T, ConfigError> {
    match provider.get_module_config(module_id) {
        Some(raw) => T::deserialize(raw).map_err(|source| ConfigError::Invalid {
            module: module_id.to_string(),
            source,
        }),
        None => Ok(T::default()),
    }
}

/// Scoped view for one module during one lifecycle hook.
///
/// The cancellation token fires when the hook exceeds its time bound or the
/// host shuts down; long-running hooks should observe it.
#[derive(Clone)]
pub struct ModuleCtx {
    module_id: Arc<str>,
    config: Arc<dyn ConfigProvider>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ModuleCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCtx")
            .field("module_id", &self.module_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ModuleCtx {
    pub fn new(
        module_id: impl Into<Arc<str>>,
        config: Arc<dyn ConfigProvider>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            config,
            cancel,
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Typed configuration section of this module.
    pub fn config<T: DeserializeOwned + Default>(&self) -> Result<T, ConfigError> {
        module_config_typed(self.config.as_ref(), &self.module_id)
    }

    pub fn raw_config(&self) -> Option<&serde_json::Value> {
        self.config.get_module_config(&self.module_id)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Builds [`ModuleCtx`] values that share one config provider and a root
/// cancellation token; each context gets its own child token.
#[derive(Clone)]
pub struct ModuleContextBuilder {
    config: Arc<dyn ConfigProvider>,
    root_cancel: CancellationToken,
}

impl ModuleContextBuilder {
    pub fn new(config: Arc<dyn ConfigProvider>, root_cancel: CancellationToken) -> Self {
        Self {
            config,
            root_cancel,
        }
    }

    pub fn for_module(&self, module_id: &str) -> ModuleCtx {
        ModuleCtx::new(
            module_id,
            self.config.clone(),
            self.root_cancel.child_token(),
        )
    }
}

impl Default for ModuleContextBuilder {
    fn default() -> Self {
        Self::new(Arc::new(EmptyConfigProvider), CancellationToken::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    struct MapProvider(HashMap<String, serde_json::Value>);

    impl ConfigProvider for MapProvider {
        fn get_module_config(&self, module_id: &str) -> Option<&serde_json::Value> {
            self.0.get(module_id)
        }
    }

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct BlogCfg {
        #[serde(default)]
        page_size: u32,
    }

    #[test]
    fn typed_config_and_defaults() {
        let mut sections = HashMap::new();
        sections.insert("blog".to_string(), serde_json::json!({ "page_size": 25 }));
        let builder =
            ModuleContextBuilder::new(Arc::new(MapProvider(sections)), CancellationToken::new());

        let blog: BlogCfg = builder.for_module("blog").config().unwrap();
        assert_eq!(blog.page_size, 25);

        let notes: BlogCfg = builder.for_module("notes").config().unwrap();
        assert_eq!(notes, BlogCfg::default());
    }

    #[test]
    fn invalid_section_reports_module() {
        let mut sections = HashMap::new();
        sections.insert("blog".to_string(), serde_json::json!({ "page_size": "many" }));
        let provider = MapProvider(sections);

        let err = module_config_typed::<BlogCfg>(&provider, "blog").unwrap_err();
        assert!(err.to_string().contains("'blog'"));
    }

    #[test]
    fn child_tokens_follow_root() {
        let root = CancellationToken::new();
        let builder = ModuleContextBuilder::new(Arc::new(EmptyConfigProvider), root.clone());
        let a = builder.for_module("a");
        let b = builder.for_module("b");

        a.cancellation_token().cancel();
        assert!(!b.cancellation_token().is_cancelled());

        root.cancel();
        assert!(b.cancellation_token().is_cancelled());
    }
}
