//! Database module for tokenguard
//!
//! This module provides database connectivity, models, and repositories
//! for persistent storage using PostgreSQL and SQLx, plus in-memory
//! stand-ins with the same contracts.

pub mod memory;
pub mod models;
pub mod pool;
pub mod repositories;

// Re-export commonly used items
pub use memory::{MemoryActivityLog, MemoryTokenStore, MemoryUserDirectory};
pub use models::*;
pub use pool::{DbConfig, DbError, create_pool, create_pool_with_migrations};
pub use repositories::{
    ActivityLog, ActivityLogError, ActivityRepository, RefreshTokenRepository, StoreError,
    TokenStore, UserDirectory, UserRepository, UserRepositoryError,
};

// Re-export sqlx types that might be needed
pub use sqlx::PgPool;
