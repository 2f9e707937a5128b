//! Database models for tokenguard
//!
//! This module defines the database entity structs that map to PostgreSQL tables.
//! The in-memory stores use the same structs so both backends hand out identical records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// User Model
// ============================================================================

/// User entity representing a registered user
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub user_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The authenticated identity carried inside tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

impl From<User> for Principal {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.user_name,
        }
    }
}

// ============================================================================
// Refresh Token Model
// ============================================================================

/// One issued refresh token.
///
/// A family's current token is the single record with `is_used == false` and
/// `is_revoked == false`; every earlier record of the chain is used or revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    /// SHA-256 of the signed token; unique across all records
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub user_id: Uuid,
    pub family: Uuid,
    pub device_fingerprint: String,
    pub ip_address: String,
    pub user_agent: String,
    pub is_used: bool,
    pub is_revoked: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// Whether the record is past its absolute expiry at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether this record is the live head of its family
    pub fn is_live(&self) -> bool {
        !self.is_used && !self.is_revoked
    }
}

/// Refresh token data for creation (without id, flags and timestamps).
/// `token` is the raw signed token; stores persist only its hash.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub token: String,
    pub user_id: Uuid,
    pub family: Uuid,
    pub device_fingerprint: String,
    pub ip_address: String,
    pub user_agent: String,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Token Activity Model
// ============================================================================

/// Security-relevant event kinds recorded against a refresh token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    RefreshAttempt,
    TokenReuse,
    SuspiciousDevice,
    SuspiciousActivity,
    Logout,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityKind::RefreshAttempt => write!(f, "refresh_attempt"),
            ActivityKind::TokenReuse => write!(f, "token_reuse"),
            ActivityKind::SuspiciousDevice => write!(f, "suspicious_device"),
            ActivityKind::SuspiciousActivity => write!(f, "suspicious_activity"),
            ActivityKind::Logout => write!(f, "logout"),
        }
    }
}

/// Append-only audit entry. `refresh_token_id` is a lookup key, not a foreign key.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TokenActivityRecord {
    pub id: Uuid,
    pub refresh_token_id: Uuid,
    pub activity: ActivityKind,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

/// Activity data for creation
#[derive(Debug, Clone)]
pub struct NewTokenActivity {
    pub refresh_token_id: Uuid,
    pub activity: ActivityKind,
    pub ip_address: String,
    pub user_agent: String,
}

/// Activity columns that can be counted distinctly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityField {
    IpAddress,
    UserAgent,
}

impl ActivityField {
    /// Column name in `token_activities`
    pub fn column(&self) -> &'static str {
        match self {
            ActivityField::IpAddress => "ip_address",
            ActivityField::UserAgent => "user_agent",
        }
    }

    /// Read this field from an activity record
    pub fn value_of<'a>(&self, record: &'a TokenActivityRecord) -> &'a str {
        match self {
            ActivityField::IpAddress => &record.ip_address,
            ActivityField::UserAgent => &record.user_agent,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
