use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One entry of the `files` column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub path: String,
    pub size: u64,
    pub sha256: String,
    pub storage_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Provenance recorded for versions imported from GitHub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSource {
    pub kind: String,
    pub url: String,
    pub repo: String,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    pub commit: String,
    pub path: String,
    pub imported_at: i64,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "package_versions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub package_id: i32,
    pub version: String,
    #[sea_orm(column_type = "Text")]
    pub changelog: String,
    #[sea_orm(column_type = "Json")]
    pub tags: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub files: serde_json::Value,
    pub fingerprint: String,
    #[sea_orm(column_type = "Json", nullable)]
    pub source: Option<serde_json::Value>,
    pub created_by: Uuid,
    pub created_at: DateTime,
}

impl Model {
    pub fn stored_files(&self) -> Result<Vec<StoredFile>, serde_json::Error> {
        serde_json::from_value(self.files.clone())
    }

    pub fn tag_list(&self) -> Vec<String> {
        serde_json::from_value(self.tags.clone()).unwrap_or_default()
    }

    pub fn version_source(&self) -> Option<VersionSource> {
        self.source
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::packages::Entity",
        from = "Column::PackageId",
        to = "super::packages::Column::Id"
    )]
    Package,
}

impl Related<super::packages::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Package.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
