use std::net::SocketAddr;
use std::sync::Arc;

use tokenguard::core::auth::{
    AbusePolicy, AuthApiState, RotationEngine, TokenCodec, auth_api_router,
};
use tokenguard::core::config::Config;
use tokenguard::core::db::{
    ActivityRepository, DbConfig, MemoryActivityLog, MemoryTokenStore, MemoryUserDirectory,
    RefreshTokenRepository, UserRepository, create_pool_with_migrations,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    // Initialize tracing, RUST_LOG overrides the default filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tokenguard=info,tower_http=info")),
        )
        .init();

    // Load application config from environment variables
    let config = Config::from_env();
    let codec = TokenCodec::from_env()?;
    let policy = AbusePolicy::from_env();

    // Log config status (without revealing secrets)
    tracing::info!(
        "Config loaded: database={}, bind={}, secure_cookies={}, store_timeout={}s",
        config.has_database(),
        config.bind_addr,
        config.cookie_secure,
        config.store_timeout_secs
    );

    let (engine, pool) = match &config.database_url {
        Some(url) => {
            let pool = create_pool_with_migrations(&DbConfig::from_url(url.clone())).await?;
            let engine = RotationEngine::new(
                Arc::new(RefreshTokenRepository::new(pool.clone())),
                Arc::new(ActivityRepository::new(pool.clone())),
                Arc::new(UserRepository::new(pool.clone())),
                codec,
            );
            (engine, Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, tokens and users are kept in memory only");
            let engine = RotationEngine::new(
                Arc::new(MemoryTokenStore::new()),
                Arc::new(MemoryActivityLog::new()),
                Arc::new(MemoryUserDirectory::default()),
                codec,
            );
            (engine, None)
        }
    };

    let engine = engine
        .with_policy(policy)
        .with_store_timeout(config.store_timeout());

    let mut state = AuthApiState::new(engine).cookie_secure(config.cookie_secure);
    if let Some(pool) = pool {
        state = state.with_pool(pool);
    }

    let app = auth_api_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);

    // Peer addresses feed the device fingerprint when no proxy header is present
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
