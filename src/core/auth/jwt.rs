//! Token codec
//!
//! Issues and verifies HS256 JWTs. Access tokens are short-lived (1 minute),
//! refresh tokens are long-lived (7 days) and carry the rotation family id.
//! The two kinds are signed with distinct secrets, so a leaked access key cannot
//! forge refresh tokens and vice versa.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default access token expiration time (1 minute)
const ACCESS_TOKEN_EXPIRATION_SECONDS: i64 = 60;

/// Default refresh token expiration time (7 days)
const REFRESH_TOKEN_EXPIRATION_DAYS: i64 = 7;

/// Upper bound for access token lifetimes (1 day)
const MAX_ACCESS_TOKEN_EXPIRATION_SECONDS: i64 = 86_400;

/// Upper bound for refresh token lifetimes (1 year)
const MAX_REFRESH_TOKEN_EXPIRATION_DAYS: i64 = 365;

/// JWT configuration
#[derive(Clone)]
pub struct JwtConfig {
    /// Secret for signing access tokens
    pub access_secret: String,
    /// Secret for signing refresh tokens, must differ from `access_secret`
    pub refresh_secret: String,
    /// Access token expiration in seconds
    pub access_token_expiration_seconds: i64,
    /// Refresh token expiration in days
    pub refresh_token_expiration_days: i64,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field(
                "access_token_expiration_seconds",
                &self.access_token_expiration_seconds,
            )
            .field(
                "refresh_token_expiration_days",
                &self.refresh_token_expiration_days,
            )
            .finish()
    }
}

impl JwtConfig {
    /// Create a new JWT configuration
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_token_expiration_seconds: ACCESS_TOKEN_EXPIRATION_SECONDS,
            refresh_token_expiration_days: REFRESH_TOKEN_EXPIRATION_DAYS,
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Result<Self, JwtError> {
        let access_secret = std::env::var("ACCESS_TOKEN_SECRET")
            .map_err(|_| JwtError::MissingSecret("ACCESS_TOKEN_SECRET"))?;
        let refresh_secret = std::env::var("REFRESH_TOKEN_SECRET")
            .map_err(|_| JwtError::MissingSecret("REFRESH_TOKEN_SECRET"))?;

        let access_exp = std::env::var("ACCESS_TOKEN_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(ACCESS_TOKEN_EXPIRATION_SECONDS);

        let refresh_exp = std::env::var("REFRESH_TOKEN_TTL_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(REFRESH_TOKEN_EXPIRATION_DAYS);

        Ok(Self::new(access_secret, refresh_secret)
            .access_token_expiration(access_exp)
            .refresh_token_expiration(refresh_exp))
    }

    /// Set access token expiration
    pub fn access_token_expiration(mut self, seconds: i64) -> Self {
        self.access_token_expiration_seconds = seconds;
        self
    }

    /// Set refresh token expiration
    pub fn refresh_token_expiration(mut self, days: i64) -> Self {
        self.refresh_token_expiration_days = days;
        self
    }
}

/// Why a token failed verification. Kept for operator logs; never shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    Signature,
    Expired,
    Malformed,
}

/// JWT errors
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("{0} environment variable not set")]
    MissingSecret(&'static str),

    #[error("Access and refresh secrets must be distinct and non-empty")]
    WeakSecrets,

    #[error("{0} lifetime out of range")]
    InvalidLifetime(&'static str),

    #[error("Token encoding failed: {0}")]
    EncodingError(String),

    /// Deliberately uniform message: callers must not learn which check failed
    #[error("Invalid token")]
    Invalid(InvalidReason),
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        let reason = match err.kind() {
            ErrorKind::ExpiredSignature => InvalidReason::Expired,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => InvalidReason::Signature,
            _ => InvalidReason::Malformed,
        };
        JwtError::Invalid(reason)
    }
}

/// Access token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessClaims {
    pub email: String,
    pub user_id: Uuid,
    pub exp: i64,
    pub iat: i64,
    pub jti: Uuid,
}

/// Refresh token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshClaims {
    pub email: String,
    pub user_id: Uuid,
    /// Rotation family shared by every token descended from one login
    pub family: Uuid,
    pub exp: i64,
    pub iat: i64,
    pub jti: Uuid,
}

/// A freshly signed token and its absolute expiry
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies access and refresh tokens
#[derive(Clone)]
pub struct TokenCodec {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    /// Create a codec. Rejects empty or shared secrets and lifetimes that are
    /// not positive or exceed the configured maximum.
    pub fn new(config: JwtConfig) -> Result<Self, JwtError> {
        if config.access_secret.is_empty()
            || config.refresh_secret.is_empty()
            || config.access_secret == config.refresh_secret
        {
            return Err(JwtError::WeakSecrets);
        }

        let access_ttl = Some(config.access_token_expiration_seconds)
            .filter(|s| (1..=MAX_ACCESS_TOKEN_EXPIRATION_SECONDS).contains(s))
            .and_then(Duration::try_seconds)
            .ok_or(JwtError::InvalidLifetime("Access token"))?;
        let refresh_ttl = Some(config.refresh_token_expiration_days)
            .filter(|d| (1..=MAX_REFRESH_TOKEN_EXPIRATION_DAYS).contains(d))
            .and_then(Duration::try_days)
            .ok_or(JwtError::InvalidLifetime("Refresh token"))?;

        let mut validation = Validation::default();
        // Strict expiration checking
        validation.leeway = 0;

        Ok(Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            validation,
            access_ttl,
            refresh_ttl,
        })
    }

    /// Create codec from environment variables
    pub fn from_env() -> Result<Self, JwtError> {
        Self::new(JwtConfig::from_env()?)
    }

    /// Issue a short-lived access token
    pub fn issue_access_token(&self, user_id: Uuid, email: &str) -> Result<IssuedToken, JwtError> {
        let now = Utc::now();
        let expires_at = now + self.access_token_ttl();

        let claims = AccessClaims {
            email: email.to_string(),
            user_id,
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4(),
        };

        let token = encode(&Header::default(), &claims, &self.access_encoding)
            .map_err(|e| JwtError::EncodingError(e.to_string()))?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Issue a refresh token bound to `family`
    pub fn issue_refresh_token(
        &self,
        user_id: Uuid,
        email: &str,
        family: Uuid,
    ) -> Result<IssuedToken, JwtError> {
        let now = Utc::now();
        let expires_at = now + self.refresh_token_ttl();

        let claims = RefreshClaims {
            email: email.to_string(),
            user_id,
            family,
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4(),
        };

        let token = encode(&Header::default(), &claims, &self.refresh_encoding)
            .map_err(|e| JwtError::EncodingError(e.to_string()))?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Verify an access token against the access secret
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, JwtError> {
        let data = decode::<AccessClaims>(token, &self.access_decoding, &self.validation)?;
        Ok(data.claims)
    }

    /// Verify a refresh token against the refresh secret
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, JwtError> {
        let data = decode::<RefreshClaims>(token, &self.refresh_decoding, &self.validation)?;
        Ok(data.claims)
    }

    pub fn access_token_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCESS: &str = "access_secret_for_testing_only_32b!";
    const REFRESH: &str = "refresh_secret_for_testing_only_32b";

    fn create_test_codec() -> TokenCodec {
        TokenCodec::new(JwtConfig::new(ACCESS, REFRESH)).unwrap()
    }

    // ========================================================================
    // JwtConfig Tests
    // ========================================================================

    #[test]
    fn test_jwt_config_new() {
        let config = JwtConfig::new("a", "b");

        assert_eq!(config.access_secret, "a");
        assert_eq!(config.refresh_secret, "b");
        assert_eq!(config.access_token_expiration_seconds, 60);
        assert_eq!(config.refresh_token_expiration_days, 7);
    }

    #[test]
    fn test_jwt_config_builder() {
        let config = JwtConfig::new("a", "b")
            .access_token_expiration(30)
            .refresh_token_expiration(14);

        assert_eq!(config.access_token_expiration_seconds, 30);
        assert_eq!(config.refresh_token_expiration_days, 14);
    }

    #[test]
    fn test_jwt_config_debug_redacts_secrets() {
        let debug = format!("{:?}", JwtConfig::new(ACCESS, REFRESH));
        assert!(!debug.contains(ACCESS));
        assert!(!debug.contains(REFRESH));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_codec_rejects_shared_secret() {
        let result = TokenCodec::new(JwtConfig::new("same", "same"));
        assert!(matches!(result, Err(JwtError::WeakSecrets)));
    }

    #[test]
    fn test_codec_rejects_empty_secret() {
        assert!(matches!(
            TokenCodec::new(JwtConfig::new("", "b")),
            Err(JwtError::WeakSecrets)
        ));
        assert!(matches!(
            TokenCodec::new(JwtConfig::new("a", "")),
            Err(JwtError::WeakSecrets)
        ));
    }

    #[test]
    fn test_codec_rejects_out_of_range_lifetimes() {
        for seconds in [0, -10, MAX_ACCESS_TOKEN_EXPIRATION_SECONDS + 1] {
            let config = JwtConfig::new(ACCESS, REFRESH).access_token_expiration(seconds);
            assert!(matches!(
                TokenCodec::new(config),
                Err(JwtError::InvalidLifetime("Access token"))
            ));
        }

        for days in [0, -1, MAX_REFRESH_TOKEN_EXPIRATION_DAYS + 1, i64::MAX] {
            let config = JwtConfig::new(ACCESS, REFRESH).refresh_token_expiration(days);
            assert!(matches!(
                TokenCodec::new(config),
                Err(JwtError::InvalidLifetime("Refresh token"))
            ));
        }
    }

    #[test]
    fn test_codec_accepts_lifetime_bounds() {
        let config = JwtConfig::new(ACCESS, REFRESH)
            .access_token_expiration(MAX_ACCESS_TOKEN_EXPIRATION_SECONDS)
            .refresh_token_expiration(MAX_REFRESH_TOKEN_EXPIRATION_DAYS);
        let codec = TokenCodec::new(config).unwrap();

        assert_eq!(codec.access_token_ttl(), Duration::days(1));
        assert_eq!(codec.refresh_token_ttl(), Duration::days(365));
    }

    // ========================================================================
    // Issue / Verify Tests
    // ========================================================================

    #[test]
    fn test_access_token_round_trip() {
        let codec = create_test_codec();
        let user_id = Uuid::new_v4();

        let issued = codec.issue_access_token(user_id, "a@x.com").unwrap();
        assert!(issued.expires_at > Utc::now());
        assert!(issued.expires_at <= Utc::now() + Duration::seconds(60));

        let claims = codec.verify_access(&issued.token).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.exp, issued.expires_at.timestamp());
    }

    #[test]
    fn test_refresh_token_carries_family() {
        let codec = create_test_codec();
        let user_id = Uuid::new_v4();
        let family = Uuid::new_v4();

        let issued = codec
            .issue_refresh_token(user_id, "a@x.com", family)
            .unwrap();
        let claims = codec.verify_refresh(&issued.token).unwrap();

        assert_eq!(claims.family, family);
        assert_eq!(claims.user_id, user_id);
        assert!(issued.expires_at > Utc::now() + Duration::days(6));
    }

    #[test]
    fn test_claims_use_camel_case_user_id() {
        let codec = create_test_codec();
        let issued = codec
            .issue_refresh_token(Uuid::new_v4(), "a@x.com", Uuid::new_v4())
            .unwrap();
        let claims = codec.verify_refresh(&issued.token).unwrap();

        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("userId").is_some());
        assert!(json.get("family").is_some());
        assert!(json.get("user_id").is_none());
    }

    #[test]
    fn test_tokens_minted_in_same_second_differ() {
        let codec = create_test_codec();
        let user_id = Uuid::new_v4();
        let family = Uuid::new_v4();

        let first = codec.issue_refresh_token(user_id, "a@x.com", family).unwrap();
        let second = codec.issue_refresh_token(user_id, "a@x.com", family).unwrap();
        assert_ne!(first.token, second.token);
    }

    #[test]
    fn test_refresh_token_not_accepted_as_access() {
        let codec = create_test_codec();
        let issued = codec
            .issue_refresh_token(Uuid::new_v4(), "a@x.com", Uuid::new_v4())
            .unwrap();

        let result = codec.verify_access(&issued.token);
        assert!(matches!(
            result,
            Err(JwtError::Invalid(InvalidReason::Signature))
        ));
    }

    #[test]
    fn test_access_token_not_accepted_as_refresh() {
        let codec = create_test_codec();
        let issued = codec.issue_access_token(Uuid::new_v4(), "a@x.com").unwrap();

        assert!(matches!(
            codec.verify_refresh(&issued.token),
            Err(JwtError::Invalid(_))
        ));
    }

    #[test]
    fn test_verify_with_other_codec_fails() {
        let ours = create_test_codec();
        let theirs = TokenCodec::new(JwtConfig::new("other_access", "other_refresh")).unwrap();

        let issued = ours
            .issue_refresh_token(Uuid::new_v4(), "a@x.com", Uuid::new_v4())
            .unwrap();
        assert!(matches!(
            theirs.verify_refresh(&issued.token),
            Err(JwtError::Invalid(InvalidReason::Signature))
        ));
    }

    #[test]
    fn test_verify_malformed_token() {
        let codec = create_test_codec();
        assert!(matches!(
            codec.verify_refresh("invalid.token.here"),
            Err(JwtError::Invalid(InvalidReason::Malformed))
        ));
    }

    #[test]
    fn test_expired_token() {
        let codec = create_test_codec();
        let now = Utc::now();
        let claims = AccessClaims {
            email: "a@x.com".to_string(),
            user_id: Uuid::new_v4(),
            exp: (now - Duration::seconds(10)).timestamp(),
            iat: (now - Duration::seconds(70)).timestamp(),
            jti: Uuid::new_v4(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(ACCESS.as_bytes()),
        )
        .unwrap();

        let result = codec.verify_access(&token);
        assert!(
            matches!(result, Err(JwtError::Invalid(InvalidReason::Expired))),
            "Expected expired token, got: {:?}",
            result
        );
    }

    // ========================================================================
    // Error Tests
    // ========================================================================

    #[test]
    fn test_invalid_error_display_is_uniform() {
        for reason in [
            InvalidReason::Signature,
            InvalidReason::Expired,
            InvalidReason::Malformed,
        ] {
            assert_eq!(JwtError::Invalid(reason).to_string(), "Invalid token");
        }
    }

    #[test]
    fn test_missing_secret_display() {
        assert_eq!(
            JwtError::MissingSecret("REFRESH_TOKEN_SECRET").to_string(),
            "REFRESH_TOKEN_SECRET environment variable not set"
        );
    }
}
