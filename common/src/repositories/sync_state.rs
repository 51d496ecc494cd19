use crate::entities::backup_sync_state::{self, SyncStatus};
use crate::entities::prelude::*;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, Set};
use std::sync::Arc;

#[async_trait::async_trait]
pub trait SyncStateRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<backup_sync_state::Model>, DbErr>;

    async fn save(
        &self,
        key: &str,
        cursor: Option<String>,
        status: SyncStatus,
        last_error: Option<String>,
    ) -> Result<backup_sync_state::Model, DbErr>;
}

pub struct SyncStateRepositoryImpl {
    db: Arc<DatabaseConnection>,
}

impl SyncStateRepositoryImpl {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl SyncStateRepository for SyncStateRepositoryImpl {
    async fn get(&self, key: &str) -> Result<Option<backup_sync_state::Model>, DbErr> {
        BackupSyncState::find_by_id(key.to_string())
            .one(self.db.as_ref())
            .await
    }

    async fn save(
        &self,
        key: &str,
        cursor: Option<String>,
        status: SyncStatus,
        last_error: Option<String>,
    ) -> Result<backup_sync_state::Model, DbErr> {
        let now = chrono::Utc::now().naive_utc();
        match self.get(key).await? {
            Some(existing) => {
                let mut active: backup_sync_state::ActiveModel = existing.into();
                active.cursor = Set(cursor);
                active.status = Set(status);
                active.last_error = Set(last_error);
                active.updated_at = Set(now);
                active.update(self.db.as_ref()).await
            }
            None => {
                backup_sync_state::ActiveModel {
                    key: Set(key.to_string()),
                    cursor: Set(cursor),
                    status: Set(status),
                    last_error: Set(last_error),
                    updated_at: Set(now),
                }
                .insert(self.db.as_ref())
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::MigratorTrait;
    use sea_orm::Database;

    #[tokio::test]
    async fn save_inserts_then_updates() -> anyhow::Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        migration::Migrator::up(&db, None).await?;
        let repo = SyncStateRepositoryImpl::new(Arc::new(db));

        assert!(repo.get("default").await?.is_none());
        repo.save("default", Some("7".into()), SyncStatus::Running, None)
            .await?;
        let saved = repo
            .save("default", None, SyncStatus::Error, Some("boom".into()))
            .await?;
        assert_eq!(saved.cursor, None);
        assert_eq!(saved.status, SyncStatus::Error);
        assert_eq!(repo.get("default").await?.unwrap().last_error.as_deref(), Some("boom"));
        Ok(())
    }
}
