use anyhow::Result;
use async_trait::async_trait;
use common::entities::package_versions::StoredFile;
use common::entities::packages::PackageKind;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

/// One entry of a recursive Git tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: Option<String>,
}

impl TreeEntry {
    pub fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

/// A change applied on top of a base tree. A `None` sha deletes the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeChange {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: Option<String>,
}

impl TreeChange {
    pub fn upsert(path: impl Into<String>, blob_sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: "100644".to_string(),
            kind: "blob".to_string(),
            sha: Some(blob_sha.into()),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: "100644".to_string(),
            kind: "blob".to_string(),
            sha: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefUpdate {
    Updated,
    /// The branch no longer descends from the base we built on.
    Rejected,
}

/// Git Data API surface of one mirror repository.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MirrorRepository: Send + Sync {
    async fn default_branch(&self) -> Result<String>;
    async fn branch_head(&self, branch: &str) -> Result<String>;
    async fn commit_tree(&self, commit_sha: &str) -> Result<String>;
    async fn list_tree(&self, tree_sha: &str) -> Result<Vec<TreeEntry>>;
    /// `None` when the file does not exist on the branch.
    async fn read_file(&self, path: &str, branch: &str) -> Result<Option<Vec<u8>>>;
    async fn create_blob(&self, content: Vec<u8>) -> Result<String>;
    async fn create_tree(&self, base_tree: &str, changes: Vec<TreeChange>) -> Result<String>;
    async fn create_commit(&self, message: &str, tree_sha: &str, parent: &str) -> Result<String>;
    /// Fast-forward only.
    async fn update_branch(&self, branch: &str, commit_sha: &str) -> Result<RefUpdate>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPackage {
    pub slug: String,
    pub display_name: String,
    pub owner_handle: String,
    pub version: String,
    /// Epoch milliseconds.
    pub published_at: i64,
    pub files: Vec<StoredFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupItem {
    Ready(BackupPackage),
    MissingVersion { slug: String },
    MissingOwner { slug: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPage {
    pub items: Vec<BackupItem>,
    /// Resume point after this page.
    pub cursor: Option<String>,
    pub is_done: bool,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackupSource: Send + Sync {
    async fn fetch_page(
        &self,
        kind: PackageKind,
        cursor: Option<String>,
        batch_size: u64,
    ) -> Result<BackupPage>;
}
