mod backup;
mod github;
mod ports;

use backup::source::DbBackupSource;
use backup::{BackupOptions, BackupSync, BackupTarget};
use common::db;
use common::repositories::{PackageRepositoryImpl, SyncStateRepositoryImpl};
use common::settings::Settings;
use common::storage::S3Storage;
use github::{GitDataClient, InstallationTokenProvider, TokenSource};
use ports::MirrorRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Default)]
struct RunFlags {
    once: bool,
    dry_run: bool,
}

fn parse_flags<I, S>(args: I) -> RunFlags
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut flags = RunFlags::default();
    for arg in args {
        match arg.as_ref() {
            "--once" => flags.once = true,
            "--dry-run" => flags.dry_run = true,
            _ => {}
        }
    }
    flags
}

fn build_mirror(
    settings: &Settings,
    tokens: Option<&Arc<dyn TokenSource>>,
    repo: &str,
) -> anyhow::Result<Option<Arc<dyn MirrorRepository>>> {
    let Some(tokens) = tokens else {
        return Ok(None);
    };
    let client = GitDataClient::new(&settings.github.api_url, repo, tokens.clone())?;
    Ok(Some(Arc::new(client)))
}

async fn run_all(syncs: &[BackupSync], options: &BackupOptions) {
    for sync in syncs {
        let target = sync.target();
        match sync.run(options).await {
            Ok(result) => tracing::info!(
                kind = %target.kind,
                repo = %target.repo,
                ok = result.stats.ok,
                skipped = result.stats.skipped,
                updated = result.stats.updated,
                missing_version = result.stats.missing_version,
                missing_owner = result.stats.missing_owner,
                errors = result.stats.errors,
                is_done = result.is_done,
                "Backup run finished"
            ),
            Err(e) => tracing::error!(kind = %target.kind, repo = %target.repo, "Backup run failed: {:#}", e),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::new().expect("Failed to load configuration");

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "worker=debug,common=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let flags = parse_flags(std::env::args().skip(1));

    let db = Arc::new(db::establish_connection(&settings.database.url).await?);
    let blobs = Arc::new(S3Storage::new(&settings.s3).await);
    let source = Arc::new(DbBackupSource::new(Arc::new(PackageRepositoryImpl::new(
        db.clone(),
    ))));
    let state = Arc::new(SyncStateRepositoryImpl::new(db));

    let tokens: Option<Arc<dyn TokenSource>> = if settings.github_app.is_configured() {
        Some(Arc::new(InstallationTokenProvider::new(
            &settings.github_app,
            &settings.github.api_url,
        )?))
    } else {
        tracing::warn!("GitHub App credentials missing; backup runs will be no-ops");
        None
    };

    let syncs = [
        BackupTarget::skills(&settings.backup),
        BackupTarget::souls(&settings.backup),
    ]
    .into_iter()
    .map(|target| {
        let mirror = build_mirror(&settings, tokens.as_ref(), &target.repo)?;
        Ok::<_, anyhow::Error>(BackupSync::new(
            target,
            source.clone(),
            mirror,
            blobs.clone(),
            state.clone(),
        ))
    })
    .collect::<anyhow::Result<Vec<_>>>()?;

    let options = BackupOptions::from_settings(&settings.backup, flags.dry_run);

    if flags.once {
        run_all(&syncs, &options).await;
        return Ok(());
    }

    let period = Duration::from_secs(settings.backup.interval_seconds.max(60));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(every_secs = period.as_secs(), "Starting backup worker");

    loop {
        tokio::select! {
            _ = interval.tick() => run_all(&syncs, &options).await,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down backup worker");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_picked_out_of_mixed_args() {
        let flags = parse_flags(["--port", "4000", "--once", "--dry-run"]);
        assert!(flags.once);
        assert!(flags.dry_run);

        let flags = parse_flags(["--config", "worker.toml"]);
        assert!(!flags.once && !flags.dry_run);
    }

    #[test]
    fn mirror_is_absent_without_tokens() {
        let mirror = build_mirror(&Settings::default(), None, "clawdbot/skills").unwrap();
        assert!(mirror.is_none());
    }
}
