use crate::entities::package_versions::{StoredFile, VersionSource};
use crate::entities::packages::PackageKind;
use crate::entities::{package_versions, packages, prelude::*, users};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

pub struct CreateVersionParams {
    pub kind: PackageKind,
    pub slug: String,
    pub display_name: String,
    pub owner_user_id: Uuid,
    pub summary: Option<String>,
    pub version: String,
    pub changelog: String,
    pub tags: Vec<String>,
    pub files: Vec<StoredFile>,
    pub fingerprint: String,
    pub source: Option<VersionSource>,
}

/// One row of a backup page: the package plus whatever could be joined.
#[derive(Debug, Clone)]
pub struct PackagePageRow {
    pub package: packages::Model,
    pub latest: Option<package_versions::Model>,
    pub owner: Option<users::Model>,
}

#[async_trait::async_trait]
pub trait PackageRepository: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<users::Model>, DbErr>;

    /// Creates the user row on first sight; refreshes the handle otherwise.
    async fn ensure_user(&self, user_id: Uuid, handle: &str) -> Result<users::Model, DbErr>;

    async fn find_by_slug(
        &self,
        kind: PackageKind,
        slug: &str,
    ) -> Result<Option<packages::Model>, DbErr>;

    async fn find_version(
        &self,
        package_id: i32,
        version: &str,
    ) -> Result<Option<package_versions::Model>, DbErr>;

    async fn find_latest_version(
        &self,
        package: &packages::Model,
    ) -> Result<Option<package_versions::Model>, DbErr>;

    async fn create_version(
        &self,
        params: CreateVersionParams,
    ) -> Result<(packages::Model, package_versions::Model), DbErr>;

    /// Keyset page of non-deleted packages with `id > after_id`, ascending.
    async fn list_page(
        &self,
        kind: PackageKind,
        after_id: Option<i32>,
        limit: u64,
    ) -> Result<Vec<PackagePageRow>, DbErr>;
}

pub struct PackageRepositoryImpl {
    db: Arc<DatabaseConnection>,
}

impl PackageRepositoryImpl {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, DbErr> {
    serde_json::to_value(value).map_err(|e| DbErr::Custom(format!("serialize: {}", e)))
}

#[async_trait::async_trait]
impl PackageRepository for PackageRepositoryImpl {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<users::Model>, DbErr> {
        Users::find_by_id(user_id).one(self.db.as_ref()).await
    }

    async fn ensure_user(&self, user_id: Uuid, handle: &str) -> Result<users::Model, DbErr> {
        let now = chrono::Utc::now().naive_utc();
        match Users::find_by_id(user_id).one(self.db.as_ref()).await? {
            Some(existing) if existing.handle == handle => Ok(existing),
            Some(existing) => {
                let mut active: users::ActiveModel = existing.into();
                active.handle = Set(handle.to_string());
                active.updated_at = Set(now);
                active.update(self.db.as_ref()).await
            }
            None => {
                users::ActiveModel {
                    user_id: Set(user_id),
                    handle: Set(handle.to_string()),
                    display_name: Set(None),
                    deleted_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(self.db.as_ref())
                .await
            }
        }
    }

    async fn find_by_slug(
        &self,
        kind: PackageKind,
        slug: &str,
    ) -> Result<Option<packages::Model>, DbErr> {
        Packages::find()
            .filter(packages::Column::Kind.eq(kind))
            .filter(packages::Column::Slug.eq(slug))
            .one(self.db.as_ref())
            .await
    }

    async fn find_version(
        &self,
        package_id: i32,
        version: &str,
    ) -> Result<Option<package_versions::Model>, DbErr> {
        PackageVersions::find()
            .filter(package_versions::Column::PackageId.eq(package_id))
            .filter(package_versions::Column::Version.eq(version))
            .one(self.db.as_ref())
            .await
    }

    async fn find_latest_version(
        &self,
        package: &packages::Model,
    ) -> Result<Option<package_versions::Model>, DbErr> {
        match package.latest_version_id {
            Some(id) => PackageVersions::find_by_id(id).one(self.db.as_ref()).await,
            None => Ok(None),
        }
    }

    async fn create_version(
        &self,
        params: CreateVersionParams,
    ) -> Result<(packages::Model, package_versions::Model), DbErr> {
        let now = chrono::Utc::now().naive_utc();
        let txn = self.db.begin().await?;

        let existing = Packages::find()
            .filter(packages::Column::Kind.eq(params.kind))
            .filter(packages::Column::Slug.eq(params.slug.as_str()))
            .one(&txn)
            .await?;
        let package = match existing {
            Some(package) => package,
            None => {
                packages::ActiveModel {
                    kind: Set(params.kind),
                    slug: Set(params.slug.clone()),
                    display_name: Set(params.display_name.clone()),
                    owner_user_id: Set(params.owner_user_id),
                    latest_version_id: Set(None),
                    summary: Set(params.summary.clone()),
                    deleted_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?
            }
        };

        let version = package_versions::ActiveModel {
            package_id: Set(package.id),
            version: Set(params.version),
            changelog: Set(params.changelog),
            tags: Set(to_json(&params.tags)?),
            files: Set(to_json(&params.files)?),
            fingerprint: Set(params.fingerprint),
            source: Set(params.source.as_ref().map(to_json).transpose()?),
            created_by: Set(params.owner_user_id),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut active: packages::ActiveModel = package.into();
        active.latest_version_id = Set(Some(version.id));
        active.display_name = Set(params.display_name);
        if params.summary.is_some() {
            active.summary = Set(params.summary);
        }
        active.updated_at = Set(now);
        let package = active.update(&txn).await?;

        txn.commit().await?;
        Ok((package, version))
    }

    async fn list_page(
        &self,
        kind: PackageKind,
        after_id: Option<i32>,
        limit: u64,
    ) -> Result<Vec<PackagePageRow>, DbErr> {
        let mut query = Packages::find()
            .filter(packages::Column::Kind.eq(kind))
            .filter(packages::Column::DeletedAt.is_null());
        if let Some(after_id) = after_id {
            query = query.filter(packages::Column::Id.gt(after_id));
        }
        let page = query
            .order_by_asc(packages::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await?;

        let mut rows = Vec::with_capacity(page.len());
        for package in page {
            let latest = self.find_latest_version(&package).await?;
            let owner = Users::find_by_id(package.owner_user_id)
                .one(self.db.as_ref())
                .await?;
            rows.push(PackagePageRow {
                package,
                latest,
                owner,
            });
        }
        Ok(rows)
    }
}
