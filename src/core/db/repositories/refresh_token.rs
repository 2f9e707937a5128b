//! Refresh token store
//!
//! Persists issued refresh tokens and the flags that drive rotation: `is_used` flips
//! when a token is consumed, `is_revoked` flips when its family is burned.
//! Tokens are stored as SHA-256 hashes; the raw token never reaches the database.
//!
//! Per-family writes (`create_if_absent`, `revoke_family`) take a transaction-scoped
//! advisory lock on the family id, so a revocation can never interleave with the
//! insert of a replacement token in the same family.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::core::db::models::{NewRefreshToken, RefreshTokenRecord};

/// Token store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another record already holds this token. Treated as an incident, never retried.
    #[error("Refresh token collision")]
    Collision,

    #[error("Token store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if err
            .as_database_error()
            .is_some_and(|db_err| db_err.is_unique_violation())
        {
            return StoreError::Collision;
        }
        StoreError::Unavailable(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for StoreError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        StoreError::Unavailable("operation timed out".to_string())
    }
}

/// Storage for refresh token records.
///
/// Implementations must make `mark_used` a compare-and-set and must apply
/// `revoke_family` to the whole family atomically.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert a new record. Fails with [`StoreError::Collision`] if the token exists.
    /// A record created in an already revoked family is stored revoked.
    async fn create_if_absent(
        &self,
        new: NewRefreshToken,
    ) -> Result<RefreshTokenRecord, StoreError>;

    async fn find_by_token(&self, token: &str)
    -> Result<Option<RefreshTokenRecord>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// All records of a family, oldest first
    async fn find_by_family(&self, family: Uuid)
    -> Result<Vec<RefreshTokenRecord>, StoreError>;

    /// Flip `is_used` on a live record. Returns `false` when the record was already
    /// used or revoked, i.e. another caller got there first.
    async fn mark_used(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Revoke every non-revoked record of the family. Idempotent; returns rows changed.
    async fn revoke_family(&self, family: Uuid) -> Result<u64, StoreError>;

    /// Families of `user_id` that still hold a live, unexpired token
    async fn active_families(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError>;
}

/// Hash a token using SHA-256
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// PostgreSQL-backed token store
#[derive(Clone)]
pub struct RefreshTokenRepository {
    pool: PgPool,
}

impl RefreshTokenRepository {
    /// Create a new refresh token repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_family(
        tx: &mut Transaction<'_, Postgres>,
        family: Uuid,
    ) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(family)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

const RECORD_COLUMNS: &str = "id, token_hash, user_id, family, device_fingerprint, ip_address, \
     user_agent, is_used, is_revoked, expires_at, created_at, updated_at";

#[async_trait]
impl TokenStore for RefreshTokenRepository {
    async fn create_if_absent(
        &self,
        new: NewRefreshToken,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let token_hash = hash_token(&new.token);
        let mut tx = self.pool.begin().await?;
        Self::lock_family(&mut tx, new.family).await?;

        let query = format!(
            r#"
            WITH burned AS (
                SELECT EXISTS (
                    SELECT 1 FROM refresh_tokens WHERE family = $3 AND is_revoked
                ) AS revoked
            )
            INSERT INTO refresh_tokens
                (token_hash, user_id, family, device_fingerprint, ip_address, user_agent,
                 expires_at, is_used, is_revoked)
            SELECT $1, $2, $3, $4, $5, $6, $7, burned.revoked, burned.revoked
            FROM burned
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let record = sqlx::query_as::<_, RefreshTokenRecord>(&query)
            .bind(&token_hash)
            .bind(new.user_id)
            .bind(new.family)
            .bind(&new.device_fingerprint)
            .bind(&new.ip_address)
            .bind(&new.user_agent)
            .bind(new.expires_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn find_by_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM refresh_tokens WHERE token_hash = $1");
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&query)
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM refresh_tokens WHERE id = $1");
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn find_by_family(
        &self,
        family: Uuid,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM refresh_tokens WHERE family = $1 ORDER BY created_at ASC"
        );
        let records = sqlx::query_as::<_, RefreshTokenRecord>(&query)
            .bind(family)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn mark_used(&self, id: Uuid) -> Result<bool, StoreError> {
        // Row lock on UPDATE serializes racers; only one sees is_used = FALSE.
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_used = TRUE, updated_at = NOW()
            WHERE id = $1 AND is_used = FALSE AND is_revoked = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_family(&self, family: Uuid) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_family(&mut tx, family).await?;

        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = TRUE, is_used = TRUE, updated_at = NOW()
            WHERE family = $1 AND is_revoked = FALSE
            "#,
        )
        .bind(family)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn active_families(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let families = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT family FROM refresh_tokens
            WHERE user_id = $1 AND is_used = FALSE AND is_revoked = FALSE AND expires_at > $2
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(families)
    }
}
