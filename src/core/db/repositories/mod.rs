//! Database repositories for tokenguard
//!
//! Each repository pairs a storage trait with its PostgreSQL implementation.
//! The rotation engine only ever sees the traits.

pub mod activity;
pub mod refresh_token;
pub mod user;

pub use activity::{ActivityLog, ActivityLogError, ActivityRepository};
pub use refresh_token::{RefreshTokenRepository, StoreError, TokenStore, hash_token};
pub use user::{UserDirectory, UserRepository, UserRepositoryError};
