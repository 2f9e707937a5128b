//! Auth API endpoints
//!
//! Provides REST API endpoints for authentication:
//! - POST /auth/register - Register a new user
//! - POST /auth/login - Login; access token in the body, refresh token in a cookie
//! - POST /auth/refresh - Rotate the refresh token cookie and issue a new access token
//! - DELETE /auth/logout - Revoke the refresh token family and clear the cookie
//! - GET /auth/me - Get current user info from the access token
//! - GET /health - Liveness and database reachability

use axum::{
    Json, Router,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Serialize;
use sqlx::PgPool;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::auth::{
    AuthError, LoginRequest, RegisterRequest, RequestMetadata, RotationEngine,
};
use crate::core::db::pool::health_check;

/// Name of the refresh token cookie
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Auth API state containing the rotation engine
#[derive(Clone)]
pub struct AuthApiState {
    pub engine: RotationEngine,
    /// Whether cookies carry the `Secure` attribute
    pub cookie_secure: bool,
    /// Probed by `/health` when the service runs on PostgreSQL
    pub pool: Option<PgPool>,
}

impl AuthApiState {
    pub fn new(engine: RotationEngine) -> Self {
        Self {
            engine,
            cookie_secure: true,
            pool: None,
        }
    }

    pub fn cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    fn refresh_cookie(&self, token: String) -> Cookie<'static> {
        let max_age = time::Duration::seconds(self.engine.refresh_token_ttl().num_seconds());
        Cookie::build((REFRESH_COOKIE, token))
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Strict)
            .path("/")
            .max_age(max_age)
            .build()
    }

    fn cleared_cookie(&self) -> Cookie<'static> {
        Cookie::build((REFRESH_COOKIE, ""))
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Strict)
            .path("/")
            .max_age(time::Duration::ZERO)
            .build()
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub code: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
        }
    }
}

/// Convert AuthError to API response
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AuthError::MissingCredentials => (StatusCode::BAD_REQUEST, "MISSING_CREDENTIALS"),
            AuthError::UserNotFound => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            AuthError::EmailAlreadyExists => (StatusCode::CONFLICT, "EMAIL_EXISTS"),
            AuthError::Unauthenticated => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            AuthError::Collision | AuthError::StoreUnavailable(_) | AuthError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        // Store and codec details stay in the logs
        let message = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ApiError::new(message, code))).into_response()
    }
}

/// Response for login
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub user_id: Uuid,
    pub user_name: String,
}

/// Response for registration
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub user_name: String,
}

/// Response for token refresh
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
}

/// Response for logout
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: String,
}

/// Response for the current user
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Create the auth API router
pub fn auth_api_router(state: AuthApiState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/auth/logout", delete(logout_handler))
        .route("/auth/me", get(me_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

impl<S> FromRequestParts<S> for RequestMetadata
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Ok(request_metadata(&parts.headers, peer))
    }
}

/// POST /auth/register
/// Register a new user
async fn register_handler(
    State(state): State<Arc<AuthApiState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AuthError> {
    tracing::info!("Registration attempt for email: {}", request.email);

    let principal = state.engine.register(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: principal.id,
            user_name: principal.name,
        }),
    ))
}

/// POST /auth/login
/// Login with email and password
async fn login_handler(
    State(state): State<Arc<AuthApiState>>,
    jar: CookieJar,
    meta: RequestMetadata,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), AuthError> {
    tracing::info!("Login attempt for email: {}", request.email);

    let outcome = state.engine.login(request, &meta).await?;
    let jar = jar.add(state.refresh_cookie(outcome.refresh_token.token));

    tracing::info!("User logged in successfully: {}", outcome.principal.email);

    Ok((
        jar,
        Json(LoginResponse {
            access_token: outcome.access_token.token,
            user_id: outcome.principal.id,
            user_name: outcome.principal.name,
        }),
    ))
}

/// POST /auth/refresh
/// Rotate the refresh token cookie. Every failure is a 401 that clears the cookie.
async fn refresh_handler(
    State(state): State<Arc<AuthApiState>>,
    jar: CookieJar,
    meta: RequestMetadata,
) -> Response {
    tracing::debug!("Token refresh request");

    let presented = jar.get(REFRESH_COOKIE).map(|c| c.value().to_owned());

    match state.engine.refresh(presented.as_deref(), &meta).await {
        Ok(outcome) => {
            let jar = jar.add(state.refresh_cookie(outcome.refresh_token.token));
            (
                jar,
                Json(RefreshResponse {
                    access_token: outcome.access_token.token,
                }),
            )
                .into_response()
        }
        Err(_) => (
            StatusCode::UNAUTHORIZED,
            jar.add(state.cleared_cookie()),
            Json(ApiError::new("Unauthorized", "UNAUTHENTICATED")),
        )
            .into_response(),
    }
}

/// DELETE /auth/logout
/// Revoke the presented token's family. Always succeeds.
async fn logout_handler(
    State(state): State<Arc<AuthApiState>>,
    jar: CookieJar,
    meta: RequestMetadata,
) -> (CookieJar, Json<LogoutResponse>) {
    tracing::info!("Logout request");

    let presented = jar.get(REFRESH_COOKIE).map(|c| c.value().to_owned());
    state.engine.logout(presented.as_deref(), &meta).await;

    (
        jar.add(state.cleared_cookie()),
        Json(LogoutResponse {
            message: "Logged out successfully".to_string(),
        }),
    )
}

/// GET /auth/me
/// Get current user info from access token
async fn me_handler(
    State(state): State<Arc<AuthApiState>>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, AuthError> {
    let token = extract_bearer_token(&headers)?;

    let claims = state.engine.authenticate_access(&token)?;

    Ok(Json(MeResponse {
        user_id: claims.user_id,
        email: claims.email,
    }))
}

/// GET /health
async fn health_handler(State(state): State<Arc<AuthApiState>>) -> Response {
    let healthy = match &state.pool {
        Some(pool) => match health_check(pool).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Health check failed: {}", e);
                false
            }
        },
        None => true,
    };

    let (status, label) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
        }),
    )
        .into_response()
}

/// Extract Bearer token from Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::Unauthenticated)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::Unauthenticated)?
        .trim();

    if token.is_empty() {
        return Err(AuthError::Unauthenticated);
    }

    Ok(token.to_string())
}

/// Build request metadata from headers and the peer address
fn request_metadata(headers: &HeaderMap, peer: Option<IpAddr>) -> RequestMetadata {
    RequestMetadata {
        ip_address: client_ip(headers, peer),
        user_agent: header_value(headers, header::USER_AGENT.as_str()).unwrap_or_default(),
        accept_language: header_value(headers, header::ACCEPT_LANGUAGE.as_str())
            .unwrap_or_default(),
    }
}

/// Client IP: first `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
/// Header values that are not IP addresses are ignored.
fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    header_value(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().and_then(parse_ip))
        .or_else(|| header_value(headers, "x-real-ip").and_then(|v| parse_ip(&v)))
        .or(peer)
        .map(|ip| ip.to_string())
        .unwrap_or_default()
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    value.trim().parse().ok()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}
