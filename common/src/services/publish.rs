use super::ServiceError;
use crate::domain::hashing::{fingerprint, sha256_hex};
use crate::domain::paths::sanitize_path;
use crate::domain::skill::{parse_version, verify_slug};
use crate::entities::package_versions::{StoredFile, VersionSource};
use crate::entities::packages::PackageKind;
use crate::error::ImportError;
use crate::repositories::packages::{CreateVersionParams, PackageRepository};
use crate::storage::{new_storage_key, BlobStorage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

/// The authenticated user a publish is performed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishActor {
    pub user_id: Uuid,
    pub handle: String,
}

/// A file before it has been hashed and stored.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub path: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub kind: PackageKind,
    pub slug: String,
    pub display_name: String,
    pub version: String,
    pub changelog: String,
    pub tags: Vec<String>,
    pub summary: Option<String>,
    pub files: Vec<StoredFile>,
    pub source: Option<VersionSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    pub package_id: i32,
    pub version_id: i32,
    pub slug: String,
    pub version: String,
    pub fingerprint: String,
}

/// Who holds a slug and what it was last published at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugHolder {
    pub owner_user_id: Uuid,
    pub latest_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestVersionDto {
    pub version: String,
    pub fingerprint: String,
    pub changelog: String,
    pub tags: Vec<String>,
    pub files: Vec<StoredFile>,
    pub source: Option<VersionSource>,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDetail {
    pub id: i32,
    pub kind: PackageKind,
    pub slug: String,
    pub display_name: String,
    pub summary: Option<String>,
    pub owner_handle: Option<String>,
    pub latest_version: Option<LatestVersionDto>,
    pub updated_at: chrono::NaiveDateTime,
}

pub fn guess_content_type(path: &str) -> Option<String> {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())?;
    let mime = match ext.as_str() {
        "md" | "markdown" | "mdx" => "text/markdown",
        "txt" => "text/plain",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",
        "js" | "mjs" | "cjs" => "text/javascript",
        "ts" => "text/typescript",
        "py" => "text/x-python",
        "sh" => "text/x-shellscript",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        _ => return None,
    };
    Some(mime.to_string())
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PublishService: Send + Sync {
    /// Hashes and stores each file, returning entries ready for `publish`.
    /// Paths must already be relative to the package root.
    async fn store_files(&self, files: Vec<UploadFile>) -> Result<Vec<StoredFile>, ServiceError>;

    async fn publish(
        &self,
        actor: &PublishActor,
        request: PublishRequest,
    ) -> Result<PublishResult, ServiceError>;

    async fn slug_holder(
        &self,
        kind: PackageKind,
        slug: &str,
    ) -> Result<Option<SlugHolder>, ServiceError>;

    async fn get_package(&self, kind: PackageKind, slug: &str)
        -> Result<PackageDetail, ServiceError>;
}

pub struct PublishServiceImpl {
    repo: Arc<dyn PackageRepository>,
    storage: Arc<dyn BlobStorage>,
}

impl PublishServiceImpl {
    pub fn new(repo: Arc<dyn PackageRepository>, storage: Arc<dyn BlobStorage>) -> Self {
        Self { repo, storage }
    }

    fn validate(request: &PublishRequest) -> Result<(), ServiceError> {
        verify_slug(&request.slug).map_err(|e| ServiceError::new(400, e.to_string()))?;
        if request.display_name.trim().is_empty() {
            return Err(ServiceError::new(400, "Display name is required"));
        }
        parse_version(&request.version).map_err(|e| ServiceError::new(400, e.to_string()))?;
        if request.files.is_empty() {
            return Err(ImportError::NoFilesSelected.into());
        }

        let mut seen = HashSet::new();
        for file in &request.files {
            if sanitize_path(&file.path).as_deref() != Some(file.path.as_str()) {
                return Err(ImportError::InvalidPath(file.path.clone()).into());
            }
            if !seen.insert(file.path.as_str()) {
                return Err(ServiceError::new(400, format!("Duplicate file path: {}", file.path)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PublishService for PublishServiceImpl {
    async fn store_files(&self, files: Vec<UploadFile>) -> Result<Vec<StoredFile>, ServiceError> {
        let mut stored = Vec::with_capacity(files.len());
        for file in files {
            let path = sanitize_path(&file.path)
                .ok_or_else(|| ImportError::InvalidPath(file.path.clone()))?;
            let sha256 = sha256_hex(&file.bytes);
            let size = file.bytes.len() as u64;
            let storage_key = new_storage_key();
            self.storage
                .put(&storage_key, file.bytes)
                .await
                .map_err(|e| ServiceError::new(500, format!("Storage error: {}", e)))?;
            stored.push(StoredFile {
                content_type: guess_content_type(&path),
                path,
                size,
                sha256,
                storage_key,
            });
        }
        Ok(stored)
    }

    async fn publish(
        &self,
        actor: &PublishActor,
        request: PublishRequest,
    ) -> Result<PublishResult, ServiceError> {
        Self::validate(&request)?;
        let version = parse_version(&request.version)
            .map_err(|e| ServiceError::new(400, e.to_string()))?;

        self.repo.ensure_user(actor.user_id, &actor.handle).await?;

        if let Some(package) = self.repo.find_by_slug(request.kind, &request.slug).await? {
            if package.owner_user_id != actor.user_id {
                return Err(ServiceError::new(
                    409,
                    format!("Slug '{}' is owned by another user", request.slug),
                ));
            }
            if self
                .repo
                .find_version(package.id, &request.version)
                .await?
                .is_some()
            {
                return Err(ServiceError::new(
                    409,
                    format!("Version {} already exists", request.version),
                ));
            }
            if let Some(latest) = self.repo.find_latest_version(&package).await? {
                if let Ok(latest_version) = parse_version(&latest.version) {
                    if version <= latest_version {
                        return Err(ServiceError::new(
                            409,
                            format!(
                                "Version {} must be greater than latest {}",
                                request.version, latest.version
                            ),
                        ));
                    }
                }
            }
        }

        let fingerprint = fingerprint(
            request
                .files
                .iter()
                .map(|f| (f.path.as_str(), f.sha256.as_str())),
        );

        let (package, created) = self
            .repo
            .create_version(CreateVersionParams {
                kind: request.kind,
                slug: request.slug.clone(),
                display_name: request.display_name.trim().to_string(),
                owner_user_id: actor.user_id,
                summary: request.summary,
                version: version.to_string(),
                changelog: request.changelog,
                tags: request.tags,
                files: request.files,
                fingerprint: fingerprint.clone(),
                source: request.source,
            })
            .await?;

        tracing::info!(
            kind = %request.kind,
            slug = %package.slug,
            version = %created.version,
            actor = %actor.handle,
            "Published package version"
        );

        Ok(PublishResult {
            package_id: package.id,
            version_id: created.id,
            slug: package.slug,
            version: created.version,
            fingerprint,
        })
    }

    async fn slug_holder(
        &self,
        kind: PackageKind,
        slug: &str,
    ) -> Result<Option<SlugHolder>, ServiceError> {
        let Some(package) = self.repo.find_by_slug(kind, slug).await? else {
            return Ok(None);
        };
        let latest_version = self
            .repo
            .find_latest_version(&package)
            .await?
            .map(|v| v.version);
        Ok(Some(SlugHolder {
            owner_user_id: package.owner_user_id,
            latest_version,
        }))
    }

    async fn get_package(
        &self,
        kind: PackageKind,
        slug: &str,
    ) -> Result<PackageDetail, ServiceError> {
        let package = self
            .repo
            .find_by_slug(kind, slug)
            .await?
            .filter(|p| p.deleted_at.is_none())
            .ok_or_else(|| ServiceError::new(404, format!("Package '{}' not found", slug)))?;

        let owner_handle = self
            .repo
            .find_user(package.owner_user_id)
            .await?
            .map(|u| u.handle);

        let latest_version = match self.repo.find_latest_version(&package).await? {
            Some(v) => Some(LatestVersionDto {
                files: v
                    .stored_files()
                    .map_err(|e| ServiceError::new(500, format!("Corrupt file list: {}", e)))?,
                tags: v.tag_list(),
                source: v.version_source(),
                version: v.version,
                fingerprint: v.fingerprint,
                changelog: v.changelog,
                created_at: v.created_at,
            }),
            None => None,
        };

        Ok(PackageDetail {
            id: package.id,
            kind: package.kind,
            slug: package.slug,
            display_name: package.display_name,
            summary: package.summary,
            owner_handle,
            latest_version,
            updated_at: package.updated_at,
        })
    }
}
