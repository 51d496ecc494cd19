use crate::ports::{BackupItem, BackupPackage, BackupPage, BackupSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use common::entities::packages::PackageKind;
use common::repositories::packages::PackagePageRow;
use common::repositories::PackageRepository;
use std::sync::Arc;

/// Keyset pages over live packages; the cursor is the last package id seen.
pub struct DbBackupSource {
    repo: Arc<dyn PackageRepository>,
}

impl DbBackupSource {
    pub fn new(repo: Arc<dyn PackageRepository>) -> Self {
        Self { repo }
    }
}

fn to_item(row: PackagePageRow) -> BackupItem {
    let slug = row.package.slug.clone();

    let Some(owner) = row.owner.filter(|o| o.deleted_at.is_none()) else {
        return BackupItem::MissingOwner { slug };
    };
    let Some(latest) = row.latest else {
        return BackupItem::MissingVersion { slug };
    };
    let files = match latest.stored_files() {
        Ok(files) => files,
        Err(err) => {
            tracing::warn!(slug = %slug, error = %err, "Unreadable file list");
            return BackupItem::MissingVersion { slug };
        }
    };

    BackupItem::Ready(BackupPackage {
        slug,
        display_name: row.package.display_name,
        owner_handle: owner.handle,
        version: latest.version,
        published_at: latest.created_at.and_utc().timestamp_millis(),
        files,
    })
}

#[async_trait]
impl BackupSource for DbBackupSource {
    async fn fetch_page(
        &self,
        kind: PackageKind,
        cursor: Option<String>,
        batch_size: u64,
    ) -> Result<BackupPage> {
        let after_id = cursor
            .as_deref()
            .map(|c| c.parse::<i32>())
            .transpose()
            .with_context(|| format!("Invalid backup cursor {:?}", cursor))?;

        let rows = self.repo.list_page(kind, after_id, batch_size).await?;
        let is_done = (rows.len() as u64) < batch_size;
        let next_cursor = rows
            .last()
            .map(|row| row.package.id.to_string())
            .or(cursor);

        Ok(BackupPage {
            items: rows.into_iter().map(to_item).collect(),
            cursor: next_cursor,
            is_done,
        })
    }
}
