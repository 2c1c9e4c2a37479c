use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::api::state::AppState;
use crate::auth::{bearer_token, verify_credential};
use crate::db::User;
use crate::error::AppError;

/// The authenticated caller, placed in request extensions by
/// [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Raw bearer token of the current request, kept for logout.
#[derive(Debug, Clone)]
pub struct CurrentToken(pub String);

/// Authentication middleware - validates session tokens
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Auth("Missing Authorization header".to_string()))?;

    let token = bearer_token(header)?.to_string();
    let user = verify_credential(&state.db, &token).await?;

    request.extensions_mut().insert(CurrentUser(user));
    request.extensions_mut().insert(CurrentToken(token));

    Ok(next.run(request).await)
}

/// Fixed-window request counter per client IP.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<IpAddr, Window>>>,
    max_requests: u32,
    window: Duration,
}

#[derive(Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Count one request from `ip`; false once the window's budget is spent.
    pub async fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now()).await
    }

    async fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut windows = self.windows.lock().await;
        let window = windows.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) > self.window {
            *window = Window {
                started: now,
                count: 0,
            };
        }

        if window.count < self.max_requests {
            window.count += 1;
            true
        } else {
            false
        }
    }

    /// Forget clients idle for more than two windows.
    pub async fn cleanup(&self) -> usize {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        let now = Instant::now();
        windows.retain(|_, w| now.duration_since(w.started) <= self.window * 2);
        before - windows.len()
    }

    pub async fn tracked_clients(&self) -> usize {
        self.windows.lock().await.len()
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    limiter: Arc<RateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    if !limiter.check(ip).await {
        tracing::warn!(%ip, "rate limit exceeded");
        return Err(AppError::RateLimited);
    }

    Ok(next.run(request).await)
}
