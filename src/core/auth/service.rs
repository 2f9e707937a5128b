//! Rotation engine
//!
//! Business logic for login, refresh-token rotation, logout and registration.
//! Coordinates the token store, activity log, user directory and token codec.
//!
//! Refresh tokens are single use. Every successful refresh consumes the presented
//! token and issues its successor in the same family. Any sign of theft (replay,
//! device change, abusive usage, a token the store and codec disagree on) burns the
//! whole family, logging out every holder of a descendant token.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::core::auth::abuse::{AbusePolicy, Suspicion};
use crate::core::auth::fingerprint::RequestMetadata;
use crate::core::auth::jwt::{AccessClaims, IssuedToken, JwtError, TokenCodec};
use crate::core::db::models::{
    ActivityKind, NewRefreshToken, NewTokenActivity, Principal, RefreshTokenRecord,
};
use crate::core::db::repositories::user::verify_password;
use crate::core::db::repositories::{
    ActivityLog, StoreError, TokenStore, UserDirectory, UserRepositoryError,
};

/// Default deadline for a single store or log call
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Email and password are required")]
    MissingCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email already registered")]
    EmailAlreadyExists,

    /// Uniform refresh/access failure; the cause is only logged
    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Refresh token collision")]
    Collision,

    #[error("Storage unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<UserRepositoryError> for AuthError {
    fn from(err: UserRepositoryError) -> Self {
        match err {
            UserRepositoryError::NotFound => AuthError::UserNotFound,
            UserRepositoryError::EmailAlreadyExists => AuthError::EmailAlreadyExists,
            UserRepositoryError::HashingError(e) => AuthError::Internal(e),
            other @ (UserRepositoryError::DatabaseError(_) | UserRepositoryError::Timeout(_)) => {
                AuthError::StoreUnavailable(other.to_string())
            }
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Collision => AuthError::Collision,
            StoreError::Unavailable(e) => AuthError::StoreUnavailable(e),
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Invalid(_) => AuthError::Unauthenticated,
            _ => AuthError::Internal(err.to_string()),
        }
    }
}

/// Login request data
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Registration request data
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub user_name: String,
}

/// Result of a successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub principal: Principal,
    pub access_token: IssuedToken,
    pub refresh_token: IssuedToken,
}

/// Result of a successful rotation
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub access_token: IssuedToken,
    pub refresh_token: IssuedToken,
}

/// Why a presented refresh token was refused, once its record is known
#[derive(Debug)]
enum Denial {
    Expired,
    Revoked,
    DeviceMismatch,
    Reuse,
    Suspicious(Suspicion),
    Token(JwtError),
    ClaimsMismatch,
    Store(StoreError),
}

impl Denial {
    /// Whether the family must be burned in response
    fn burns_family(&self) -> bool {
        !matches!(self, Denial::Revoked)
    }

    /// Activity to append against the presented token, if any
    fn activity(&self) -> Option<ActivityKind> {
        match self {
            Denial::DeviceMismatch => Some(ActivityKind::SuspiciousDevice),
            Denial::Reuse => Some(ActivityKind::TokenReuse),
            Denial::Suspicious(_) => Some(ActivityKind::SuspiciousActivity),
            _ => None,
        }
    }
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Denial::Expired => write!(f, "token expired"),
            Denial::Revoked => write!(f, "family already revoked"),
            Denial::DeviceMismatch => write!(f, "device fingerprint mismatch"),
            Denial::Reuse => write!(f, "token reuse"),
            Denial::Suspicious(s) => write!(f, "suspicious activity: {s}"),
            Denial::Token(e) => write!(f, "token rejected by codec: {e:?}"),
            Denial::ClaimsMismatch => write!(f, "claims disagree with stored record"),
            Denial::Store(e) => write!(f, "{e}"),
        }
    }
}

impl From<StoreError> for Denial {
    fn from(err: StoreError) -> Self {
        Denial::Store(err)
    }
}

impl From<JwtError> for Denial {
    fn from(err: JwtError) -> Self {
        Denial::Token(err)
    }
}

/// Refresh-token rotation engine
#[derive(Clone)]
pub struct RotationEngine {
    tokens: Arc<dyn TokenStore>,
    activity: Arc<dyn ActivityLog>,
    users: Arc<dyn UserDirectory>,
    codec: TokenCodec,
    policy: AbusePolicy,
    store_timeout: Duration,
}

impl RotationEngine {
    /// Create a new engine with the default abuse policy and store timeout
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        activity: Arc<dyn ActivityLog>,
        users: Arc<dyn UserDirectory>,
        codec: TokenCodec,
    ) -> Self {
        Self {
            tokens,
            activity,
            users,
            codec,
            policy: AbusePolicy::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Set the abuse policy
    pub fn with_policy(mut self, policy: AbusePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the deadline applied to every store and log call
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Lifetime of issued refresh tokens
    pub fn refresh_token_ttl(&self) -> chrono::Duration {
        self.codec.refresh_token_ttl()
    }

    /// Verify a bearer access token
    pub fn authenticate_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.codec.verify_access(token).map_err(|e| {
            tracing::debug!("Access token rejected: {:?}", e);
            AuthError::Unauthenticated
        })
    }

    /// Register a new user
    pub async fn register(&self, request: RegisterRequest) -> Result<Principal, AuthError> {
        let email = request.email.trim();
        let user_name = request.user_name.trim();
        if email.is_empty() || request.password.is_empty() || user_name.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let user = self
            .bounded(self.users.create(email, &request.password, user_name))
            .await?;

        tracing::info!("User registered: {}", user.id);
        Ok(user.into())
    }

    /// Authenticate with email and password and start a new token family.
    ///
    /// Families the user still holds are revoked first, so each login leaves
    /// exactly one live family. Failure to revoke them does not block the login.
    pub async fn login(
        &self,
        request: LoginRequest,
        meta: &RequestMetadata,
    ) -> Result<LoginOutcome, AuthError> {
        let email = request.email.trim();
        if email.is_empty() || request.password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let user = self
            .bounded(self.users.find_by_email(email))
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !verify_password(&request.password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        self.retire_active_families(user.id).await;

        let principal = Principal::from(user);
        let family = Uuid::new_v4();
        let access_token = self
            .codec
            .issue_access_token(principal.id, &principal.email)?;
        let refresh_token =
            self.codec
                .issue_refresh_token(principal.id, &principal.email, family)?;

        let created = self
            .bounded(self.tokens.create_if_absent(NewRefreshToken {
                token: refresh_token.token.clone(),
                user_id: principal.id,
                family,
                device_fingerprint: meta.fingerprint(),
                ip_address: meta.ip_address.clone(),
                user_agent: meta.user_agent.clone(),
                expires_at: refresh_token.expires_at,
            }))
            .await;

        if let Err(err) = created {
            // The write may have landed before the failure surfaced
            match &err {
                StoreError::Collision => {
                    tracing::error!("Refresh token collision at login for user {}", principal.id)
                }
                StoreError::Unavailable(e) => {
                    tracing::error!("Failed to persist refresh token at login: {}", e)
                }
            }
            self.burn(family).await;
            return Err(err.into());
        }

        tracing::info!("User logged in: {} (family {})", principal.id, family);
        Ok(LoginOutcome {
            principal,
            access_token,
            refresh_token,
        })
    }

    /// Rotate a refresh token.
    ///
    /// Every failure surfaces as [`AuthError::Unauthenticated`]; the cause is only logged.
    pub async fn refresh(
        &self,
        presented: Option<&str>,
        meta: &RequestMetadata,
    ) -> Result<RefreshOutcome, AuthError> {
        let Some(token) = presented.filter(|t| !t.is_empty()) else {
            tracing::debug!("Refresh rejected: no token presented");
            return Err(AuthError::Unauthenticated);
        };

        let record = match self.bounded(self.tokens.find_by_token(token)).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!("Refresh rejected: unknown token");
                return Err(AuthError::Unauthenticated);
            }
            Err(e) => {
                tracing::error!("Refresh rejected: token lookup failed: {}", e);
                return Err(AuthError::Unauthenticated);
            }
        };

        match self.rotate(token, &record, meta).await {
            Ok(outcome) => {
                tracing::info!(
                    "Refresh token {} rotated for user {} (family {})",
                    record.id,
                    record.user_id,
                    record.family
                );
                Ok(outcome)
            }
            Err(denial) => {
                self.reject(&record, denial, meta).await;
                Err(AuthError::Unauthenticated)
            }
        }
    }

    /// Revoke the family of the presented token. Never fails.
    pub async fn logout(&self, presented: Option<&str>, meta: &RequestMetadata) {
        let Some(token) = presented.filter(|t| !t.is_empty()) else {
            tracing::debug!("Logout without refresh token");
            return;
        };

        match self.bounded(self.tokens.find_by_token(token)).await {
            Ok(Some(record)) => {
                self.burn(record.family).await;
                self.note(record.id, ActivityKind::Logout, meta).await;
                tracing::info!("User {} logged out (family {})", record.user_id, record.family);
            }
            Ok(None) => tracing::debug!("Logout with unknown refresh token"),
            Err(e) => tracing::warn!("Logout lookup failed: {}", e),
        }
    }

    /// The ordered checks of a rotation, after the record has been found
    async fn rotate(
        &self,
        token: &str,
        record: &RefreshTokenRecord,
        meta: &RequestMetadata,
    ) -> Result<RefreshOutcome, Denial> {
        if record.is_expired_at(Utc::now()) {
            return Err(Denial::Expired);
        }
        if record.is_revoked {
            return Err(Denial::Revoked);
        }
        if meta.fingerprint() != record.device_fingerprint {
            return Err(Denial::DeviceMismatch);
        }
        if record.is_used {
            return Err(Denial::Reuse);
        }

        self.note(record.id, ActivityKind::RefreshAttempt, meta).await;

        if let Some(suspicion) = self.assess(record.id).await {
            return Err(Denial::Suspicious(suspicion));
        }

        // Losing the race means another request consumed this token first
        if !self.bounded(self.tokens.mark_used(record.id)).await? {
            return Err(Denial::Reuse);
        }

        let claims = self.codec.verify_refresh(token)?;
        if claims.user_id != record.user_id || claims.family != record.family {
            return Err(Denial::ClaimsMismatch);
        }

        let access_token = self.codec.issue_access_token(claims.user_id, &claims.email)?;
        let refresh_token =
            self.codec
                .issue_refresh_token(claims.user_id, &claims.email, record.family)?;

        let successor = self
            .bounded(self.tokens.create_if_absent(NewRefreshToken {
                token: refresh_token.token.clone(),
                user_id: claims.user_id,
                family: record.family,
                device_fingerprint: record.device_fingerprint.clone(),
                ip_address: meta.ip_address.clone(),
                user_agent: meta.user_agent.clone(),
                expires_at: refresh_token.expires_at,
            }))
            .await?;

        // The family was burned by a concurrent request while we rotated
        if successor.is_revoked {
            return Err(Denial::Revoked);
        }

        Ok(RefreshOutcome {
            access_token,
            refresh_token,
        })
    }

    async fn reject(&self, record: &RefreshTokenRecord, denial: Denial, meta: &RequestMetadata) {
        match &denial {
            Denial::Store(StoreError::Collision) => tracing::error!(
                "Refresh token collision in family {} (user {})",
                record.family,
                record.user_id
            ),
            Denial::Store(_) | Denial::Token(JwtError::EncodingError(_)) => tracing::error!(
                "Refresh of token {} failed: {}",
                record.id,
                denial
            ),
            Denial::Revoked | Denial::Expired => tracing::info!(
                "Refresh of token {} rejected: {}",
                record.id,
                denial
            ),
            _ => tracing::warn!(
                "Refresh of token {} rejected for user {} from {}: {}",
                record.id,
                record.user_id,
                meta.ip_address,
                denial
            ),
        }

        if denial.burns_family() {
            self.burn(record.family).await;
        }
        if let Some(kind) = denial.activity() {
            self.note(record.id, kind, meta).await;
        }
    }

    /// Revoke every live family of `user_id`. Best effort.
    async fn retire_active_families(&self, user_id: Uuid) {
        match self
            .bounded(self.tokens.active_families(user_id, Utc::now()))
            .await
        {
            Ok(families) => {
                for family in families {
                    self.burn(family).await;
                }
            }
            Err(e) => tracing::warn!("Could not list active families of user {}: {}", user_id, e),
        }
    }

    /// Revoke a whole family. Best effort; failures are logged.
    async fn burn(&self, family: Uuid) {
        match self.bounded(self.tokens.revoke_family(family)).await {
            Ok(revoked) => tracing::debug!("Revoked {} token(s) in family {}", revoked, family),
            Err(e) => tracing::error!("Failed to revoke family {}: {}", family, e),
        }
    }

    /// Append an activity record. Failures never change the caller's decision.
    async fn note(&self, token_id: Uuid, activity: ActivityKind, meta: &RequestMetadata) {
        let event = NewTokenActivity {
            refresh_token_id: token_id,
            activity,
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
        };
        if let Err(e) = self.bounded(self.activity.record(event)).await {
            tracing::warn!("Failed to record {} for token {}: {}", activity, token_id, e);
        }
    }

    async fn assess(&self, token_id: Uuid) -> Option<Suspicion> {
        tokio::time::timeout(
            self.store_timeout,
            self.policy.assess(self.activity.as_ref(), token_id),
        )
        .await
        .unwrap_or_else(|_| {
            Some(Suspicion::EvidenceUnavailable(
                "activity log timed out".to_string(),
            ))
        })
    }

    async fn bounded<T, E>(&self, op: impl Future<Output = Result<T, E>>) -> Result<T, E>
    where
        E: From<tokio::time::error::Elapsed>,
    {
        tokio::time::timeout(self.store_timeout, op).await?
    }
}
