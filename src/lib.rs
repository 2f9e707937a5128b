//! tokenguard - Refresh Token Rotation Service
//!
//! Issues short-lived access tokens and single-use refresh tokens organised in
//! rotation families. Replayed, stolen or abused refresh tokens revoke their
//! whole family.

pub mod core;
