use super::ServiceError;
use crate::repositories::rate_limits::RateLimitRepository;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: i64,
    /// Epoch milliseconds at which the current window ends.
    pub reset_at: i64,
}

impl RateLimitDecision {
    pub fn retry_after_secs(&self, now_ms: i64) -> u64 {
        ((self.reset_at - now_ms).max(0) as u64).div_ceil(1000)
    }
}

/// Fixed-window counter persisted per key.
pub struct RateLimiter {
    repo: Arc<dyn RateLimitRepository>,
}

impl RateLimiter {
    pub fn new(repo: Arc<dyn RateLimitRepository>) -> Self {
        Self { repo }
    }

    pub async fn check(
        &self,
        key: &str,
        limit: i64,
        window: Duration,
    ) -> Result<RateLimitDecision, ServiceError> {
        self.check_at(key, limit, window, chrono::Utc::now().timestamp_millis())
            .await
    }

    /// Denied requests do not consume from the window.
    pub async fn check_at(
        &self,
        key: &str,
        limit: i64,
        window: Duration,
        now_ms: i64,
    ) -> Result<RateLimitDecision, ServiceError> {
        let window_ms = window.as_millis() as i64;
        let consumed = self.repo.consume(key, limit, window_ms, now_ms).await?;
        let reset_at = consumed.row.window_start + window_ms;

        if !consumed.allowed {
            tracing::debug!(key, limit, "Rate limit exceeded");
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at,
            });
        }

        Ok(RateLimitDecision {
            allowed: true,
            remaining: (limit - consumed.row.count as i64).max(0),
            reset_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::RateLimitRepositoryImpl;
    use migration::MigratorTrait;
    use sea_orm::{ConnectOptions, Database};

    async fn limiter() -> anyhow::Result<RateLimiter> {
        let db = Database::connect("sqlite::memory:").await?;
        migration::Migrator::up(&db, None).await?;
        Ok(RateLimiter::new(Arc::new(RateLimitRepositoryImpl::new(
            Arc::new(db),
        ))))
    }

    #[tokio::test]
    async fn denies_after_limit_until_window_rolls() -> anyhow::Result<()> {
        let limiter = limiter().await?;
        let window = Duration::from_secs(60);
        let t0 = 1_000_000;

        let first = limiter.check_at("import:u1", 2, window, t0).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert_eq!(first.reset_at, t0 + 60_000);

        let second = limiter.check_at("import:u1", 2, window, t0 + 10).await.unwrap();
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        let third = limiter.check_at("import:u1", 2, window, t0 + 20).await.unwrap();
        assert!(!third.allowed);
        assert_eq!(third.retry_after_secs(t0 + 20), 60);

        let other_key = limiter.check_at("import:u2", 2, window, t0 + 20).await.unwrap();
        assert!(other_key.allowed);

        let rolled = limiter
            .check_at("import:u1", 2, window, t0 + 60_000)
            .await
            .unwrap();
        assert!(rolled.allowed);
        assert_eq!(rolled.remaining, 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_never_exceed_the_limit() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("limits.db").display());
        let mut options = ConnectOptions::new(url);
        options.max_connections(8).sqlx_logging(false);
        let db = Database::connect(options).await?;
        migration::Migrator::up(&db, None).await?;
        let limiter = Arc::new(RateLimiter::new(Arc::new(RateLimitRepositoryImpl::new(
            Arc::new(db),
        ))));

        let now = 5_000_000;
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter
                        .check_at("import:u1", 1, Duration::from_secs(60), now)
                        .await
                })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            let decision = handle.await??;
            if decision.allowed {
                allowed += 1;
            }
            assert_eq!(decision.reset_at, now + 60_000);
        }
        assert_eq!(allowed, 1);
        Ok(())
    }
}
