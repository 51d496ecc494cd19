use crate::ports::BackupPackage;
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub const META_FILE: &str = "_meta.json";
pub const MAX_HISTORY: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaEntry {
    pub version: String,
    pub published_at: i64,
    /// Unknown until the publishing commit exists.
    pub commit: Option<String>,
}

/// Per-package `_meta.json` kept next to the mirrored files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetaFile {
    pub owner: String,
    pub slug: String,
    pub display_name: String,
    pub latest: MetaEntry,
    #[serde(default)]
    pub history: Vec<MetaEntry>,
}

impl BackupMetaFile {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = serde_json::to_vec_pretty(self)?;
        out.push(b'\n');
        Ok(out)
    }

    /// Draft meta for `package`: the new version heads the history, older
    /// entries for the same version are dropped and the log is capped.
    pub fn next(previous: Option<&BackupMetaFile>, package: &BackupPackage) -> Self {
        let latest = MetaEntry {
            version: package.version.clone(),
            published_at: package.published_at,
            commit: None,
        };

        let mut history = vec![latest.clone()];
        if let Some(previous) = previous {
            history.extend(
                previous
                    .history
                    .iter()
                    .filter(|entry| entry.version != package.version)
                    .cloned(),
            );
        }
        history.truncate(MAX_HISTORY);

        Self {
            owner: package.owner_handle.clone(),
            slug: package.slug.clone(),
            display_name: package.display_name.clone(),
            latest,
            history,
        }
    }

    pub fn with_commit(mut self, commit: &str) -> Self {
        self.latest.commit = Some(commit.to_string());
        if let Some(head) = self
            .history
            .first_mut()
            .filter(|entry| entry.version == self.latest.version)
        {
            head.commit = Some(commit.to_string());
        }
        self
    }
}
