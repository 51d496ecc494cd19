use anyhow::Context;
use common::settings::Settings;
use common::storage::S3Storage;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use std::future::Future;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting Setup...");

    let settings = Settings::new().context("Failed to load config")?;

    let db = wait_for_db(&settings.database.url).await?;

    tracing::info!("Running migrations...");
    Migrator::up(&db, None).await?;
    tracing::info!("Migrations applied.");

    setup_storage(&settings).await?;

    tracing::info!("Setup completed successfully!");
    Ok(())
}

/// Runs `op` until it succeeds or `max_attempts` is reached.
async fn retry<T, F, Fut>(
    what: &str,
    max_attempts: u32,
    delay: Duration,
    mut op: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => {
                return Err(e.context(format!(
                    "{} still failing after {} attempts",
                    what, attempt
                )));
            }
            Err(e) => {
                tracing::warn!(
                    "{} failed (attempt {}): {}. Retrying in {}s...",
                    what,
                    attempt,
                    e,
                    delay.as_secs()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

async fn wait_for_db(url: &str) -> anyhow::Result<DatabaseConnection> {
    tracing::info!("Connecting to database...");
    let db = retry("Database connection", MAX_ATTEMPTS, RETRY_DELAY, || async {
        Ok::<_, anyhow::Error>(Database::connect(url).await?)
    })
    .await?;
    tracing::info!("Database connected!");
    Ok(db)
}

async fn setup_storage(settings: &Settings) -> anyhow::Result<()> {
    let storage = S3Storage::new(&settings.s3).await;
    tracing::info!("Setting up S3 (Bucket: {})...", storage.bucket());

    let created = retry("Bucket setup", MAX_ATTEMPTS, RETRY_DELAY, || {
        storage.ensure_bucket()
    })
    .await?;

    if created {
        tracing::info!("Bucket {} created.", storage.bucket());
    } else {
        tracing::info!("Bucket {} already exists.", storage.bucket());
    }
    Ok(())
}
