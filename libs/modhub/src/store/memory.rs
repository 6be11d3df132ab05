use async_trait::async_trait;
use dashmap::DashMap;

use super::{RuntimeStateRepository, UserStateRepository};
use crate::runtime::RuntimeRecord;
use crate::user_state::UserModuleState;

#[derive(Debug, Default)]
pub struct InMemoryRuntimeStateRepository {
    rows: DashMap<String, RuntimeRecord>,
}

#[async_trait]
impl RuntimeStateRepository for InMemoryRuntimeStateRepository {
    async fn load_all(&self) -> anyhow::Result<Vec<RuntimeRecord>> {
        let mut rows: Vec<RuntimeRecord> = self.rows.iter().map(|r| r.value().clone()).collect();
        rows.sort_by(|a, b| a.module_id.cmp(&b.module_id));
        Ok(rows)
    }

    async fn save(&self, record: &RuntimeRecord) -> anyhow::Result<()> {
        self.rows.insert(record.module_id.clone(), record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserStateRepository {
    rows: DashMap<(String, String), UserModuleState>,
}

#[async_trait]
impl UserStateRepository for InMemoryUserStateRepository {
    async fn get(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> anyhow::Result<Option<UserModuleState>> {
        let key = (user_id.to_string(), module_id.to_string());
        Ok(self.rows.get(&key).map(|r| r.value().clone()))
    }

    async fn upsert(&self, row: &UserModuleState) -> anyhow::Result<()> {
        let key = (row.user_id.clone(), row.module_id.clone());
        self.rows.insert(key, row.clone());
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> anyhow::Result<Vec<UserModuleState>> {
        let mut rows: Vec<UserModuleState> = self
            .rows
            .iter()
            .filter(|r| r.key().0 == user_id)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| a.module_id.cmp(&b.module_id));
        Ok(rows)
    }

    async fn delete_for_user(&self, user_id: &str) -> anyhow::Result<u64> {
        let before = self.rows.len();
        self.rows.retain(|(uid, _), _| uid != user_id);
        Ok((before - self.rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(user: &str, module: &str, enabled: bool) -> UserModuleState {
        UserModuleState {
            user_id: user.into(),
            module_id: module.into(),
            installed: true,
            enabled,
            installed_at: Some(Utc::now()),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let repo = InMemoryUserStateRepository::default();
        repo.upsert(&row("u1", "blog", true)).await.unwrap();
        repo.upsert(&row("u1", "blog", false)).await.unwrap();

        let got = repo.get("u1", "blog").await.unwrap().unwrap();
        assert!(!got.enabled);
        assert_eq!(repo.list_for_user("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_for_user_only_touches_that_user() {
        let repo = InMemoryUserStateRepository::default();
        repo.upsert(&row("u1", "blog", true)).await.unwrap();
        repo.upsert(&row("u1", "notes", true)).await.unwrap();
        repo.upsert(&row("u2", "blog", true)).await.unwrap();

        assert_eq!(repo.delete_for_user("u1").await.unwrap(), 2);
        assert!(repo.list_for_user("u1").await.unwrap().is_empty());
        assert!(repo.get("u2", "blog").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn runtime_rows_sorted_by_id() {
        let repo = InMemoryRuntimeStateRepository::default();
        repo.save(&RuntimeRecord::discovered("notes")).await.unwrap();
        repo.save(&RuntimeRecord::discovered("blog")).await.unwrap();
        let ids: Vec<_> = repo
            .load_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.module_id)
            .collect();
        assert_eq!(ids, vec!["blog", "notes"]);
    }
}
