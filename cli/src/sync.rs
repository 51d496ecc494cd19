use crate::client::{PublishUpload, Registry, UploadPayload};
use crate::local::{self, LocalSkill};
use anyhow::{Context, Result};
use common::domain::skill::{bump_version, VersionBump};
use common::entities::packages::PackageKind;
use common::services::publish::PackageDetail;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const DEFAULT_CONCURRENCY: usize = 4;
const MAX_CONCURRENCY: usize = 32;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub roots: Vec<PathBuf>,
    pub concurrency: usize,
    pub dry_run: bool,
    pub bump: VersionBump,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    New,
    /// Local content differs from the latest published version.
    Changed { latest: Option<String> },
    Synced { version: String },
}

impl SyncStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SyncStatus::New => "new",
            SyncStatus::Changed { .. } => "changed",
            SyncStatus::Synced { .. } => "synced",
        }
    }

    /// Version to publish, or `None` when nothing needs publishing.
    pub fn next_version(&self, bump: VersionBump) -> Option<String> {
        match self {
            SyncStatus::New => Some(bump_version(None, bump)),
            SyncStatus::Changed { latest } => Some(bump_version(latest.as_deref(), bump)),
            SyncStatus::Synced { .. } => None,
        }
    }
}

#[derive(Debug)]
pub struct SyncPlan {
    pub skill: LocalSkill,
    pub status: SyncStatus,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub new: usize,
    pub changed: usize,
    pub synced: usize,
    pub published: usize,
    pub failed: usize,
}

pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(1, MAX_CONCURRENCY)
}

pub fn classify(fingerprint: &str, remote: Option<&PackageDetail>) -> SyncStatus {
    let Some(remote) = remote else {
        return SyncStatus::New;
    };
    match &remote.latest_version {
        Some(latest) if latest.fingerprint == fingerprint => SyncStatus::Synced {
            version: latest.version.clone(),
        },
        Some(latest) => SyncStatus::Changed {
            latest: Some(latest.version.clone()),
        },
        None => SyncStatus::Changed { latest: None },
    }
}

async fn check_one(dir: &Path, registry: &dyn Registry) -> Result<SyncPlan> {
    let skill = local::load_skill(dir).await?;
    let remote = registry
        .package(PackageKind::Skill, &skill.slug)
        .await
        .with_context(|| format!("Failed to look up {}", skill.slug))?;
    let status = classify(&skill.fingerprint, remote.as_ref());
    Ok(SyncPlan { skill, status })
}

/// Hashes each folder and compares it with the registry using a fixed pool of
/// workers. Each worker claims the next unprocessed index until none are
/// left. Results come back in input order.
pub async fn check_all(
    dirs: Vec<PathBuf>,
    registry: Arc<dyn Registry>,
    concurrency: usize,
) -> Result<Vec<Result<SyncPlan>>> {
    let total = dirs.len();
    let dirs = Arc::new(dirs);
    let next = Arc::new(AtomicUsize::new(0));
    let workers = clamp_concurrency(concurrency).min(total.max(1));

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let (dirs, next, registry) = (dirs.clone(), next.clone(), registry.clone());
        handles.push(tokio::spawn(async move {
            let mut done = Vec::new();
            loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some(dir) = dirs.get(index) else {
                    break;
                };
                let plan = check_one(dir, registry.as_ref())
                    .await
                    .with_context(|| format!("{}", dir.display()));
                done.push((index, plan));
            }
            done
        }));
    }

    let mut results = Vec::with_capacity(total);
    for handle in handles {
        results.extend(handle.await?);
    }
    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().map(|(_, plan)| plan).collect())
}

fn upload_for(skill: &LocalSkill, version: String) -> PublishUpload {
    PublishUpload {
        slug: skill.slug.clone(),
        display_name: skill.display_name.clone(),
        version,
        changelog: None,
        summary: skill.summary.clone(),
        files: skill
            .files
            .iter()
            .map(|f| UploadPayload::new(f.path.clone(), &f.bytes))
            .collect(),
    }
}

pub async fn run(registry: Arc<dyn Registry>, options: &SyncOptions) -> Result<SyncReport> {
    let dirs = local::discover_skill_dirs(&options.roots)?;
    tracing::info!(count = dirs.len(), "Found local skills");

    let plans = check_all(dirs, registry.clone(), options.concurrency).await?;
    let mut report = SyncReport::default();

    for plan in plans {
        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => {
                report.failed += 1;
                println!("error    {:#}", e);
                continue;
            }
        };

        match plan.status {
            SyncStatus::New => report.new += 1,
            SyncStatus::Changed { .. } => report.changed += 1,
            SyncStatus::Synced { .. } => report.synced += 1,
        }

        let Some(version) = plan.status.next_version(options.bump) else {
            println!("{:<8} {}", plan.status.label(), plan.skill.slug);
            continue;
        };
        if options.dry_run {
            println!(
                "{:<8} {} -> {} (dry run)",
                plan.status.label(),
                plan.skill.slug,
                version
            );
            continue;
        }

        match registry
            .publish(PackageKind::Skill, &upload_for(&plan.skill, version))
            .await
        {
            Ok(result) => {
                report.published += 1;
                println!(
                    "{:<8} {} -> {} published",
                    plan.status.label(),
                    result.slug,
                    result.version
                );
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(slug = %plan.skill.slug, "Publish failed: {:#}", e);
                println!("error    {}: {:#}", plan.skill.slug, e);
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::services::publish::{LatestVersionDto, PublishResult};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeRegistry {
        packages: Mutex<HashMap<String, PackageDetail>>,
        published: Mutex<Vec<PublishUpload>>,
        lookups: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        reject: Option<String>,
    }

    impl FakeRegistry {
        fn with_package(self, slug: &str, version: &str, fingerprint: &str) -> Self {
            let now = chrono::Utc::now().naive_utc();
            self.packages.lock().unwrap().insert(
                slug.to_string(),
                PackageDetail {
                    id: 1,
                    kind: PackageKind::Skill,
                    slug: slug.to_string(),
                    display_name: slug.to_string(),
                    summary: None,
                    owner_handle: Some("alice".into()),
                    latest_version: Some(LatestVersionDto {
                        version: version.to_string(),
                        fingerprint: fingerprint.to_string(),
                        changelog: String::new(),
                        tags: vec!["latest".into()],
                        files: vec![],
                        source: None,
                        created_at: now,
                    }),
                    updated_at: now,
                },
            );
            self
        }
    }

    #[async_trait]
    impl Registry for FakeRegistry {
        async fn package(&self, _kind: PackageKind, slug: &str) -> Result<Option<PackageDetail>> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(self.packages.lock().unwrap().get(slug).cloned())
        }

        async fn publish(&self, _kind: PackageKind, upload: &PublishUpload) -> Result<PublishResult> {
            if self.reject.as_deref() == Some(upload.slug.as_str()) {
                anyhow::bail!("Registry error 409: Slug is owned by another user");
            }
            self.published.lock().unwrap().push(upload.clone());
            Ok(PublishResult {
                package_id: 1,
                version_id: 1,
                slug: upload.slug.clone(),
                version: upload.version.clone(),
                fingerprint: String::new(),
            })
        }
    }

    fn write_skill(root: &Path, name: &str, body: &str) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("SKILL.md"), body).unwrap();
        dir
    }

    fn options(root: &Path, dry_run: bool) -> SyncOptions {
        SyncOptions {
            roots: vec![root.to_path_buf()],
            concurrency: DEFAULT_CONCURRENCY,
            dry_run,
            bump: VersionBump::Patch,
        }
    }

    #[test]
    fn concurrency_is_clamped() {
        assert_eq!(clamp_concurrency(0), 1);
        assert_eq!(clamp_concurrency(4), 4);
        assert_eq!(clamp_concurrency(500), 32);
    }

    #[test]
    fn next_version_follows_status() {
        assert_eq!(
            SyncStatus::New.next_version(VersionBump::Minor).as_deref(),
            Some("1.0.0")
        );
        let changed = SyncStatus::Changed {
            latest: Some("1.2.3".into()),
        };
        assert_eq!(changed.next_version(VersionBump::Patch).as_deref(), Some("1.2.4"));
        assert_eq!(changed.next_version(VersionBump::Major).as_deref(), Some("2.0.0"));
        let synced = SyncStatus::Synced {
            version: "1.0.0".into(),
        };
        assert!(synced.next_version(VersionBump::Patch).is_none());
    }

    #[tokio::test]
    async fn pool_checks_every_folder_once_within_the_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs: Vec<_> = (0..10)
            .map(|i| write_skill(tmp.path(), &format!("skill-{}", i), "# s"))
            .collect();
        let registry = Arc::new(FakeRegistry::default());

        let plans = check_all(dirs.clone(), registry.clone(), 3).await.unwrap();

        assert_eq!(plans.len(), 10);
        assert_eq!(registry.lookups.load(Ordering::SeqCst), 10);
        assert!(registry.peak.load(Ordering::SeqCst) <= 3);
        for (plan, dir) in plans.iter().zip(&dirs) {
            let plan = plan.as_ref().unwrap();
            assert_eq!(&plan.skill.dir, dir);
            assert_eq!(plan.status, SyncStatus::New);
        }
    }

    #[tokio::test]
    async fn sync_publishes_new_and_changed_skills_only() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(tmp.path(), "fresh", "# fresh");
        write_skill(tmp.path(), "edited", "# edited");
        let same = write_skill(tmp.path(), "same", "# same");
        let same_fp = local::load_skill(&same).await.unwrap().fingerprint;

        let registry = Arc::new(
            FakeRegistry::default()
                .with_package("edited", "1.4.0", "stale")
                .with_package("same", "2.0.0", &same_fp),
        );

        let report = run(registry.clone(), &options(tmp.path(), false))
            .await
            .unwrap();

        assert_eq!(
            report,
            SyncReport {
                new: 1,
                changed: 1,
                synced: 1,
                published: 2,
                failed: 0,
            }
        );
        let published = registry.published.lock().unwrap();
        let versions: Vec<_> = published
            .iter()
            .map(|u| (u.slug.as_str(), u.version.as_str()))
            .collect();
        assert_eq!(versions, vec![("edited", "1.4.1"), ("fresh", "1.0.0")]);
        assert_eq!(published[1].files[0].path, "SKILL.md");
    }

    #[tokio::test]
    async fn dry_run_publishes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(tmp.path(), "fresh", "# fresh");
        let registry = Arc::new(FakeRegistry::default());

        let report = run(registry.clone(), &options(tmp.path(), true))
            .await
            .unwrap();

        assert_eq!(report.new, 1);
        assert_eq!(report.published, 0);
        assert!(registry.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_failures_are_counted_and_do_not_stop_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(tmp.path(), "mine", "# mine");
        write_skill(tmp.path(), "taken", "# taken");
        let registry = Arc::new(FakeRegistry {
            reject: Some("taken".into()),
            ..Default::default()
        });

        let report = run(registry.clone(), &options(tmp.path(), false))
            .await
            .unwrap();

        assert_eq!(report.published, 1);
        assert_eq!(report.failed, 1);
    }
}
