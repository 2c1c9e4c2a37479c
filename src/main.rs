use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use social_chat::{
    api::{create_router, AppState, RateLimiter},
    config::Config,
    db::{self, SessionRepository, UserRepository},
    error::AppError,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,social_chat=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting social chat server v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    tracing::info!("✅ Configuration loaded");

    let db = db::connect(&config).await?;
    tracing::info!("✅ Database ready: {}", config.database_url);

    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit_requests,
        config.rate_limit_window_secs,
    ));
    tracing::info!(
        "✅ Rate limiter configured ({} req per {}s per IP)",
        config.rate_limit_requests,
        config.rate_limit_window_secs
    );

    let state = AppState::new(db.clone(), config.clone());

    // Spawn background task for session cleanup
    {
        let db = db.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600)); // Every hour
            loop {
                interval.tick().await;
                match SessionRepository::cleanup_expired(&db).await {
                    Ok(removed) => tracing::debug!(removed, "🧹 Expired sessions cleaned up"),
                    Err(e) => tracing::error!("❌ Session cleanup failed: {}", e),
                }
            }
        });
        tracing::info!("✅ Session cleanup task started (runs hourly)");
    }

    // Spawn background task for rate limiter cleanup
    {
        let limiter = rate_limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300)); // Every 5 minutes
            loop {
                interval.tick().await;
                let forgotten = limiter.cleanup().await;
                tracing::debug!(forgotten, "🧹 Rate limiter cache cleaned up");
            }
        });
        tracing::info!("✅ Rate limiter cleanup task started");
    }

    // Spawn background task for presence sweep
    if config.presence_sweep_interval_secs > 0 {
        let db = db.clone();
        let every = Duration::from_secs(config.presence_sweep_interval_secs);
        let timeout = config.presence_timeout();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match UserRepository::sweep_stale(&db, timeout).await {
                    Ok(0) => {}
                    Ok(swept) => tracing::info!(swept, "🧹 Idle users marked offline"),
                    Err(e) => tracing::error!("❌ Presence sweep failed: {}", e),
                }
            }
        });
        tracing::info!(
            "✅ Presence sweep started (every {}s, timeout {}s)",
            config.presence_sweep_interval_secs,
            config.presence_timeout_secs
        );
    }

    // Build router
    let app = create_router(state, rate_limiter);

    // Bind and serve
    let addr = config.server_address();
    tracing::info!("🌐 Server listening on http://{}", addr);
    tracing::info!("🏥 Health check: http://{}/api/health", addr);
    tracing::info!("");
    tracing::info!("📚 API Endpoints:");
    tracing::info!("  POST   /api/auth/register                     - Register new user");
    tracing::info!("  POST   /api/auth/login                        - Login with password");
    tracing::info!("  POST   /api/auth/logout                       - Logout (requires auth)");
    tracing::info!("  POST   /api/auth/heartbeat                    - Refresh presence (requires auth)");
    tracing::info!("  GET    /api/chat/friends                      - Friend list with previews (requires auth)");
    tracing::info!("  GET    /api/chat/messages/:friend_id          - Conversation history (requires auth)");
    tracing::info!("  POST   /api/chat/send                         - Send message (requires auth)");
    tracing::info!("  POST   /api/friends/requests                  - Send friend request (requires auth)");
    tracing::info!("  POST   /api/friends/requests/:id              - Approve or reject (requires auth)");
    tracing::info!("  GET    /ws/chat/:friend_id?token=...          - Live chat channel");
    tracing::info!("");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
