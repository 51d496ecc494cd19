use crate::entities::{prelude::*, rate_limits};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, ExprTrait, QueryFilter, Set,
};
use std::sync::Arc;

/// Outcome of one attempt to take a slot from a key's window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumed {
    pub allowed: bool,
    pub row: rate_limits::Model,
}

#[async_trait::async_trait]
pub trait RateLimitRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<rate_limits::Model>, DbErr>;

    /// Takes one slot from the window for `key` if fewer than `limit` are
    /// used. Each step is a single statement so concurrent callers never
    /// overshoot the limit or collide on the key.
    async fn consume(
        &self,
        key: &str,
        limit: i64,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<Consumed, DbErr>;
}

pub struct RateLimitRepositoryImpl {
    db: Arc<DatabaseConnection>,
}

impl RateLimitRepositoryImpl {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl RateLimitRepository for RateLimitRepositoryImpl {
    async fn get(&self, key: &str) -> Result<Option<rate_limits::Model>, DbErr> {
        RateLimits::find_by_id(key.to_string())
            .one(self.db.as_ref())
            .await
    }

    async fn consume(
        &self,
        key: &str,
        limit: i64,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<Consumed, DbErr> {
        let db = self.db.as_ref();

        RateLimits::insert(rate_limits::ActiveModel {
            key: Set(key.to_string()),
            window_start: Set(now_ms),
            count: Set(0),
        })
        .on_conflict_do_nothing()
        .exec_without_returning(db)
        .await?;

        RateLimits::update_many()
            .col_expr(rate_limits::Column::WindowStart, Expr::value(now_ms))
            .col_expr(rate_limits::Column::Count, Expr::value(0))
            .filter(rate_limits::Column::Key.eq(key))
            .filter(rate_limits::Column::WindowStart.lte(now_ms - window_ms))
            .exec(db)
            .await?;

        let result = RateLimits::update_many()
            .col_expr(
                rate_limits::Column::Count,
                Expr::col(rate_limits::Column::Count).add(1),
            )
            .filter(rate_limits::Column::Key.eq(key))
            .filter(rate_limits::Column::Count.lt(limit))
            .exec(db)
            .await?;

        let row = self
            .get(key)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("rate limit {} not found", key)))?;

        Ok(Consumed {
            allowed: result.rows_affected == 1,
            row,
        })
    }
}
