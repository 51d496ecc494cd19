pub mod meta;
pub mod source;
pub mod tree;

use crate::ports::{BackupItem, BackupPackage, BackupSource, MirrorRepository, RefUpdate, TreeChange};
use anyhow::{Context, Result};
use common::entities::backup_sync_state::SyncStatus;
use common::entities::packages::PackageKind;
use common::repositories::SyncStateRepository;
use common::settings::BackupSettings;
use common::storage::BlobStorage;
use meta::{BackupMetaFile, META_FILE};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Ref updates rejected as non-fast-forward are retried from a fresh base
/// this many times in total.
const MAX_COMMIT_ATTEMPTS: u32 = 3;

/// Which packages go to which mirror repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTarget {
    pub kind: PackageKind,
    pub state_key: String,
    pub repo: String,
    pub root: String,
}

impl BackupTarget {
    pub fn skills(settings: &BackupSettings) -> Self {
        Self {
            kind: PackageKind::Skill,
            state_key: "default".to_string(),
            repo: settings.skills_repo.clone(),
            root: settings.skills_root.clone(),
        }
    }

    pub fn souls(settings: &BackupSettings) -> Self {
        Self {
            kind: PackageKind::Soul,
            state_key: "souls".to_string(),
            repo: settings.souls_repo.clone(),
            root: settings.souls_root.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackupOptions {
    pub dry_run: bool,
    pub batch_size: u64,
    pub max_batches: u32,
}

impl BackupOptions {
    pub fn from_settings(settings: &BackupSettings, dry_run: bool) -> Self {
        Self {
            dry_run,
            batch_size: settings.batch_size.max(1),
            max_batches: settings.max_batches,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStats {
    pub ok: u64,
    pub skipped: u64,
    pub updated: u64,
    pub missing_version: u64,
    pub missing_owner: u64,
    pub errors: u64,
}

impl BackupStats {
    fn add(&mut self, other: &BackupStats) {
        self.ok += other.ok;
        self.skipped += other.skipped;
        self.updated += other.updated;
        self.missing_version += other.missing_version;
        self.missing_owner += other.missing_owner;
        self.errors += other.errors;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRunResult {
    pub stats: BackupStats,
    pub cursor: Option<String>,
    pub is_done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Skipped,
    Updated,
}

/// Resumable mirror of one package kind into a GitHub repository.
pub struct BackupSync {
    target: BackupTarget,
    source: Arc<dyn BackupSource>,
    /// `None` when the GitHub App is not configured; runs are then no-ops.
    mirror: Option<Arc<dyn MirrorRepository>>,
    blobs: Arc<dyn BlobStorage>,
    state: Arc<dyn SyncStateRepository>,
}

impl BackupSync {
    pub fn new(
        target: BackupTarget,
        source: Arc<dyn BackupSource>,
        mirror: Option<Arc<dyn MirrorRepository>>,
        blobs: Arc<dyn BlobStorage>,
        state: Arc<dyn SyncStateRepository>,
    ) -> Self {
        Self {
            target,
            source,
            mirror,
            blobs,
            state,
        }
    }

    pub fn target(&self) -> &BackupTarget {
        &self.target
    }

    pub async fn run(&self, options: &BackupOptions) -> Result<BackupRunResult> {
        let Some(mirror) = self.mirror.as_deref() else {
            tracing::info!(kind = %self.target.kind, "GitHub App not configured, skipping backup");
            return Ok(BackupRunResult {
                stats: BackupStats::default(),
                cursor: None,
                is_done: true,
            });
        };

        let key = self.target.state_key.as_str();
        let mut cursor = if options.dry_run {
            None
        } else {
            self.state.get(key).await?.and_then(|s| s.cursor)
        };

        if !options.dry_run {
            self.state
                .save(key, cursor.clone(), SyncStatus::Running, None)
                .await?;
        }

        match self.run_batches(mirror, options, &mut cursor).await {
            Ok(result) => {
                if !options.dry_run {
                    self.state
                        .save(key, result.cursor.clone(), SyncStatus::Idle, None)
                        .await?;
                }
                Ok(result)
            }
            Err(err) => {
                tracing::error!(kind = %self.target.kind, error = %err, "Backup run failed");
                if !options.dry_run {
                    if let Err(save_err) = self
                        .state
                        .save(key, cursor, SyncStatus::Error, Some(err.to_string()))
                        .await
                    {
                        tracing::warn!(error = %save_err, "Failed to record backup failure");
                    }
                }
                Err(err)
            }
        }
    }

    async fn run_batches(
        &self,
        mirror: &dyn MirrorRepository,
        options: &BackupOptions,
        cursor: &mut Option<String>,
    ) -> Result<BackupRunResult> {
        let branch = mirror
            .default_branch()
            .await
            .with_context(|| format!("Failed to read default branch of {}", self.target.repo))?;

        let mut stats = BackupStats::default();
        let mut is_done = false;

        for batch in 0..options.max_batches {
            let page = self
                .source
                .fetch_page(self.target.kind, cursor.clone(), options.batch_size)
                .await?;

            let mut batch_stats = BackupStats::default();
            for item in page.items {
                self.sync_item(mirror, &branch, item, options.dry_run, &mut batch_stats)
                    .await;
            }
            stats.add(&batch_stats);

            is_done = page.is_done;
            *cursor = if is_done { None } else { page.cursor };
            if !options.dry_run {
                self.state
                    .save(
                        &self.target.state_key,
                        cursor.clone(),
                        SyncStatus::Running,
                        None,
                    )
                    .await?;
            }

            tracing::info!(
                kind = %self.target.kind,
                batch,
                ok = batch_stats.ok,
                skipped = batch_stats.skipped,
                updated = batch_stats.updated,
                missing_version = batch_stats.missing_version,
                missing_owner = batch_stats.missing_owner,
                errors = batch_stats.errors,
                dry_run = options.dry_run,
                "Backup batch complete"
            );

            if is_done {
                break;
            }
        }

        Ok(BackupRunResult {
            stats,
            cursor: cursor.clone(),
            is_done,
        })
    }

    async fn sync_item(
        &self,
        mirror: &dyn MirrorRepository,
        branch: &str,
        item: BackupItem,
        dry_run: bool,
        stats: &mut BackupStats,
    ) {
        match item {
            BackupItem::MissingVersion { slug } => {
                tracing::debug!(slug = %slug, kind = %self.target.kind, "No latest version");
                stats.missing_version += 1;
            }
            BackupItem::MissingOwner { slug } => {
                tracing::debug!(slug = %slug, kind = %self.target.kind, "No active owner");
                stats.missing_owner += 1;
            }
            BackupItem::Ready(package) => {
                stats.ok += 1;
                match self.sync_package(mirror, branch, &package, dry_run).await {
                    Ok(ItemOutcome::Skipped) => stats.skipped += 1,
                    Ok(ItemOutcome::Updated) => stats.updated += 1,
                    Err(err) => {
                        stats.errors += 1;
                        tracing::warn!(
                            slug = %package.slug,
                            kind = %self.target.kind,
                            error = %err,
                            "Backup item failed"
                        );
                    }
                }
            }
        }
    }

    async fn read_meta(
        &self,
        mirror: &dyn MirrorRepository,
        path: &str,
        branch: &str,
    ) -> Result<Option<BackupMetaFile>> {
        let Some(bytes) = mirror.read_file(path, branch).await? else {
            return Ok(None);
        };
        match BackupMetaFile::parse(&bytes) {
            Ok(meta) => Ok(Some(meta)),
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "Unreadable meta file, rewriting");
                Ok(None)
            }
        }
    }

    async fn sync_package(
        &self,
        mirror: &dyn MirrorRepository,
        branch: &str,
        package: &BackupPackage,
        dry_run: bool,
    ) -> Result<ItemOutcome> {
        let prefix = tree::item_prefix(&self.target.root, &package.owner_handle, &package.slug)?;
        let meta_path = format!("{}/{}", prefix, META_FILE);

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let previous = self.read_meta(mirror, &meta_path, branch).await?;
            if previous
                .as_ref()
                .is_some_and(|meta| meta.latest.version == package.version)
            {
                return Ok(ItemOutcome::Skipped);
            }
            if dry_run {
                return Ok(ItemOutcome::Updated);
            }

            match self
                .commit_package(mirror, branch, package, &prefix, previous.as_ref())
                .await?
            {
                RefUpdate::Updated => {
                    tracing::info!(
                        slug = %package.slug,
                        kind = %self.target.kind,
                        version = %package.version,
                        "Mirrored package"
                    );
                    return Ok(ItemOutcome::Updated);
                }
                RefUpdate::Rejected => {
                    tracing::warn!(
                        slug = %package.slug,
                        attempt,
                        "Branch moved during backup, retrying from fresh base"
                    );
                }
            }
        }

        anyhow::bail!(
            "branch {} kept moving after {} attempts",
            branch,
            MAX_COMMIT_ATTEMPTS
        )
    }

    /// Content commit carrying the files and a draft meta, then a child
    /// commit stamping the content commit's sha into the meta.
    async fn commit_package(
        &self,
        mirror: &dyn MirrorRepository,
        branch: &str,
        package: &BackupPackage,
        prefix: &str,
        previous: Option<&BackupMetaFile>,
    ) -> Result<RefUpdate> {
        let head = mirror.branch_head(branch).await?;
        let base_tree = mirror.commit_tree(&head).await?;
        let existing = mirror.list_tree(&base_tree).await?;
        let meta_path = format!("{}/{}", prefix, META_FILE);

        let mut changes = Vec::with_capacity(package.files.len() + 1);
        let mut keep = BTreeSet::from([meta_path.clone()]);
        for file in &package.files {
            let path = format!("{}/{}", prefix, file.path);
            if path == meta_path {
                tracing::warn!(slug = %package.slug, "Package file shadows meta file, skipped");
                continue;
            }
            let bytes = self
                .blobs
                .get(&file.storage_key)
                .await
                .with_context(|| format!("Failed to read {}", file.path))?;
            let sha = mirror.create_blob(bytes).await?;
            keep.insert(path.clone());
            changes.push(TreeChange::upsert(path, sha));
        }
        changes.extend(
            tree::stale_paths(&existing, prefix, &keep)
                .into_iter()
                .map(TreeChange::delete),
        );

        let draft = BackupMetaFile::next(previous, package);
        let draft_sha = mirror.create_blob(draft.to_bytes()?).await?;
        changes.push(TreeChange::upsert(meta_path.clone(), draft_sha));

        let label = format!(
            "{} {}/{}@{}",
            self.target.kind, package.owner_handle, package.slug, package.version
        );
        let content_tree = mirror.create_tree(&base_tree, changes).await?;
        let content_commit = mirror
            .create_commit(&format!("backup: {}", label), &content_tree, &head)
            .await?;

        let meta = draft.with_commit(&content_commit);
        let meta_sha = mirror.create_blob(meta.to_bytes()?).await?;
        let meta_tree = mirror
            .create_tree(
                &content_tree,
                vec![TreeChange::upsert(meta_path, meta_sha)],
            )
            .await?;
        let meta_commit = mirror
            .create_commit(
                &format!("backup: record commit for {}", label),
                &meta_tree,
                &content_commit,
            )
            .await?;

        mirror.update_branch(branch, &meta_commit).await
    }
}
