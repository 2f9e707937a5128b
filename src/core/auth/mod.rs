//! Authentication module for tokenguard
//!
//! This module provides authentication functionality including:
//! - JWT issue and verification with separate access and refresh secrets
//! - Refresh token rotation within token families
//! - Device fingerprinting and abuse detection on refresh
//! - REST API endpoints for auth operations

pub mod abuse;
pub mod api;
pub mod fingerprint;
pub mod jwt;
pub mod service;

pub use abuse::{AbusePolicy, Suspicion};
pub use api::{AuthApiState, REFRESH_COOKIE, auth_api_router};
pub use fingerprint::{RequestMetadata, fingerprint};
pub use jwt::{AccessClaims, IssuedToken, JwtConfig, JwtError, RefreshClaims, TokenCodec};
pub use service::{
    AuthError, LoginOutcome, LoginRequest, RefreshOutcome, RegisterRequest, RotationEngine,
};
