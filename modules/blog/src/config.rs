use serde::{Deserialize, Serialize};

/// Configuration for the blog module
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlogConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Create a welcome post on install.
    #[serde(default = "default_seed_welcome_post")]
    pub seed_welcome_post: bool,
}

impl Default for BlogConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            seed_welcome_post: default_seed_welcome_post(),
        }
    }
}

fn default_page_size() -> usize {
    20
}

fn default_seed_welcome_post() -> bool {
    true
}
