//! User directory
//!
//! Credential lookup for the login flow. Passwords are hashed with bcrypt; no
//! password policy is enforced here.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::core::db::models::User;

/// Cost factor for bcrypt hashing (12 is recommended for production)
pub const BCRYPT_COST: u32 = 12;

/// User repository error types
#[derive(Debug, thiserror::Error)]
pub enum UserRepositoryError {
    #[error("User not found")]
    NotFound,

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Password hashing failed: {0}")]
    HashingError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("User directory timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),
}

/// Hash a password using bcrypt with automatic salt generation
pub fn hash_password(password: &str, cost: u32) -> Result<String, UserRepositoryError> {
    bcrypt::hash(password, cost).map_err(|e| UserRepositoryError::HashingError(e.to_string()))
}

/// Verify a password against a bcrypt hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, UserRepositoryError> {
    bcrypt::verify(password, hash).map_err(|e| UserRepositoryError::HashingError(e.to_string()))
}

/// Lookup and registration of principals
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserRepositoryError>;

    /// Create a user with a plain text password (will be hashed)
    async fn create(
        &self,
        email: &str,
        password: &str,
        user_name: &str,
    ) -> Result<User, UserRepositoryError>;
}

/// PostgreSQL-backed user directory
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for UserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserRepositoryError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, user_name, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create(
        &self,
        email: &str,
        password: &str,
        user_name: &str,
    ) -> Result<User, UserRepositoryError> {
        if self.find_by_email(email).await?.is_some() {
            return Err(UserRepositoryError::EmailAlreadyExists);
        }

        let password_hash = hash_password(password, BCRYPT_COST)?;

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, user_name)
            VALUES ($1, $2, $3)
            RETURNING id, email, password_hash, user_name, created_at, updated_at
            "#,
        )
        .bind(email)
        .bind(&password_hash)
        .bind(user_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            // Lost a race with a concurrent registration
            if err
                .as_database_error()
                .is_some_and(|db_err| db_err.is_unique_violation())
            {
                UserRepositoryError::EmailAlreadyExists
            } else {
                UserRepositoryError::DatabaseError(err)
            }
        })?;

        Ok(user)
    }
}
