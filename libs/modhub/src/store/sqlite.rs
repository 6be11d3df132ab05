use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{RuntimeStateRepository, UserStateRepository};
use crate::runtime::{ModuleState, RuntimeRecord};
use crate::user_state::UserModuleState;

pub(super) async fn connect(dsn: &str, max_conns: u32) -> anyhow::Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(dsn)
        .with_context(|| format!("invalid SQLite DSN '{dsn}'"))?
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(max_conns.max(1))
        .connect_with(opts)
        .await
        .with_context(|| format!("failed to open SQLite database '{dsn}'"))
}

const CREATE_RUNTIME_STATE: &str = r#"
CREATE TABLE IF NOT EXISTS module_runtime_state (
    module_id    TEXT PRIMARY KEY NOT NULL,
    state        TEXT NOT NULL,
    installed_at TEXT NULL,
    updated_at   TEXT NOT NULL
)"#;

const CREATE_USER_STATE: &str = r#"
CREATE TABLE IF NOT EXISTS user_module_state (
    user_id      TEXT NOT NULL,
    module_id    TEXT NOT NULL,
    installed    INTEGER NOT NULL,
    enabled      INTEGER NOT NULL,
    installed_at TEXT NULL,
    updated_at   TEXT NOT NULL,
    PRIMARY KEY (user_id, module_id)
)"#;

#[derive(Debug, Clone)]
pub struct SqliteRuntimeStateRepository {
    pool: SqlitePool,
}

impl SqliteRuntimeStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(CREATE_RUNTIME_STATE)
            .execute(&self.pool)
            .await
            .context("creating module_runtime_state")?;
        Ok(())
    }
}

fn runtime_from_row(row: &SqliteRow) -> anyhow::Result<RuntimeRecord> {
    let state: String = row.try_get("state")?;
    Ok(RuntimeRecord {
        module_id: row.try_get("module_id")?,
        state: state.parse::<ModuleState>()?,
        installed_at: row.try_get::<Option<DateTime<Utc>>, _>("installed_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl RuntimeStateRepository for SqliteRuntimeStateRepository {
    async fn load_all(&self) -> anyhow::Result<Vec<RuntimeRecord>> {
        let rows = sqlx::query(
            "SELECT module_id, state, installed_at, updated_at \
             FROM module_runtime_state ORDER BY module_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(runtime_from_row).collect()
    }

    async fn save(&self, record: &RuntimeRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO module_runtime_state (module_id, state, installed_at, updated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(module_id) DO UPDATE SET \
               state = excluded.state, \
               installed_at = excluded.installed_at, \
               updated_at = excluded.updated_at",
        )
        .bind(&record.module_id)
        .bind(record.state.as_str())
        .bind(record.installed_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("saving runtime state of '{}'", record.module_id))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SqliteUserStateRepository {
    pool: SqlitePool,
}

impl SqliteUserStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(CREATE_USER_STATE)
            .execute(&self.pool)
            .await
            .context("creating user_module_state")?;
        Ok(())
    }
}

fn user_from_row(row: &SqliteRow) -> anyhow::Result<UserModuleState> {
    Ok(UserModuleState {
        user_id: row.try_get("user_id")?,
        module_id: row.try_get("module_id")?,
        installed: row.try_get("installed")?,
        enabled: row.try_get("enabled")?,
        installed_at: row.try_get::<Option<DateTime<Utc>>, _>("installed_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl UserStateRepository for SqliteUserStateRepository {
    async fn get(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> anyhow::Result<Option<UserModuleState>> {
        let row = sqlx::query(
            "SELECT user_id, module_id, installed, enabled, installed_at, updated_at \
             FROM user_module_state WHERE user_id = ? AND module_id = ?",
        )
        .bind(user_id)
        .bind(module_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn upsert(&self, row: &UserModuleState) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO user_module_state \
               (user_id, module_id, installed, enabled, installed_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(user_id, module_id) DO UPDATE SET \
               installed = excluded.installed, \
               enabled = excluded.enabled, \
               installed_at = excluded.installed_at, \
               updated_at = excluded.updated_at",
        )
        .bind(&row.user_id)
        .bind(&row.module_id)
        .bind(row.installed)
        .bind(row.enabled)
        .bind(row.installed_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("saving state of '{}' for user '{}'", row.module_id, row.user_id))?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> anyhow::Result<Vec<UserModuleState>> {
        let rows = sqlx::query(
            "SELECT user_id, module_id, installed, enabled, installed_at, updated_at \
             FROM user_module_state WHERE user_id = ? ORDER BY module_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn delete_for_user(&self, user_id: &str) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM user_module_state WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}
