//! Token activity log
//!
//! Append-only audit trail of security events per refresh token. Rows are never
//! updated or deleted. The rotation engine also reads it back as evidence for the
//! abuse heuristic.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::db::models::{ActivityField, NewTokenActivity, TokenActivityRecord};

/// Activity log error types
#[derive(Debug, thiserror::Error)]
pub enum ActivityLogError {
    #[error("Activity log unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for ActivityLogError {
    fn from(err: sqlx::Error) -> Self {
        ActivityLogError::Unavailable(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ActivityLogError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ActivityLogError::Unavailable("operation timed out".to_string())
    }
}

#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Append one event
    async fn record(&self, event: NewTokenActivity) -> Result<(), ActivityLogError>;

    /// Number of events for `token_id` within the trailing `window`
    async fn count_recent(&self, token_id: Uuid, window: Duration)
    -> Result<u64, ActivityLogError>;

    /// Number of distinct values of `field` ever recorded for `token_id`
    async fn count_distinct(
        &self,
        token_id: Uuid,
        field: ActivityField,
    ) -> Result<u64, ActivityLogError>;

    /// Every event for `token_id`, oldest first
    async fn list_for_token(
        &self,
        token_id: Uuid,
    ) -> Result<Vec<TokenActivityRecord>, ActivityLogError>;
}

/// PostgreSQL-backed activity log
#[derive(Clone)]
pub struct ActivityRepository {
    pool: PgPool,
}

impl ActivityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityLog for ActivityRepository {
    async fn record(&self, event: NewTokenActivity) -> Result<(), ActivityLogError> {
        sqlx::query(
            r#"
            INSERT INTO token_activities (refresh_token_id, activity, ip_address, user_agent)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(event.refresh_token_id)
        .bind(event.activity)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_recent(
        &self,
        token_id: Uuid,
        window: Duration,
    ) -> Result<u64, ActivityLogError> {
        let since = Utc::now() - window;
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM token_activities
            WHERE refresh_token_id = $1 AND created_at >= $2
            "#,
        )
        .bind(token_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn count_distinct(
        &self,
        token_id: Uuid,
        field: ActivityField,
    ) -> Result<u64, ActivityLogError> {
        // Column names come from a closed enum, never from input
        let query = format!(
            "SELECT COUNT(DISTINCT {}) FROM token_activities WHERE refresh_token_id = $1",
            field.column()
        );
        let count: i64 = sqlx::query_scalar(&query)
            .bind(token_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn list_for_token(
        &self,
        token_id: Uuid,
    ) -> Result<Vec<TokenActivityRecord>, ActivityLogError> {
        let records = sqlx::query_as::<_, TokenActivityRecord>(
            r#"
            SELECT id, refresh_token_id, activity, ip_address, user_agent, created_at
            FROM token_activities
            WHERE refresh_token_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(token_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
