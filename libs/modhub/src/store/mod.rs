//! Durable state behind the orchestrator and the user overlay.

mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crate::runtime::RuntimeRecord;
use crate::user_state::UserModuleState;

pub use memory::{InMemoryRuntimeStateRepository, InMemoryUserStateRepository};
pub use sqlite::{SqliteRuntimeStateRepository, SqliteUserStateRepository};

/// System-wide lifecycle state, one row per module id.
#[async_trait]
pub trait RuntimeStateRepository: Send + Sync {
    async fn load_all(&self) -> anyhow::Result<Vec<RuntimeRecord>>;

    async fn save(&self, record: &RuntimeRecord) -> anyhow::Result<()>;
}

/// Per-user overlay rows, unique on `(user_id, module_id)`.
#[async_trait]
pub trait UserStateRepository: Send + Sync {
    async fn get(&self, user_id: &str, module_id: &str)
        -> anyhow::Result<Option<UserModuleState>>;

    async fn upsert(&self, row: &UserModuleState) -> anyhow::Result<()>;

    async fn list_for_user(&self, user_id: &str) -> anyhow::Result<Vec<UserModuleState>>;

    /// Returns the number of deleted rows.
    async fn delete_for_user(&self, user_id: &str) -> anyhow::Result<u64>;
}

/// How the host persists its state.
#[derive(Debug, Clone)]
pub enum StorageOptions {
    /// Process-local maps; state is lost on restart.
    InMemory,
    /// SQLite database; tables are created on connect.
    Sqlite { dsn: String, max_conns: u32 },
}

/// Pair of repositories the host runtime hands to its components.
#[derive(Clone)]
pub struct Storage {
    pub runtime: Arc<dyn RuntimeStateRepository>,
    pub users: Arc<dyn UserStateRepository>,
}

impl Storage {
    pub fn in_memory() -> Self {
        Self {
            runtime: Arc::new(InMemoryRuntimeStateRepository::default()),
            users: Arc::new(InMemoryUserStateRepository::default()),
        }
    }

    pub async fn connect(opts: &StorageOptions) -> anyhow::Result<Self> {
        match opts {
            StorageOptions::InMemory => Ok(Self::in_memory()),
            StorageOptions::Sqlite { dsn, max_conns } => {
                let pool = sqlite::connect(dsn, *max_conns).await?;
                let runtime = SqliteRuntimeStateRepository::new(pool.clone());
                runtime.migrate().await?;
                let users = SqliteUserStateRepository::new(pool);
                users.migrate().await?;
                tracing::info!(dsn = %dsn, "SQLite state store ready");
                Ok(Self {
                    runtime: Arc::new(runtime),
                    users: Arc::new(users),
                })
            }
        }
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}
