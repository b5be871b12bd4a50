//! Fixed-window request limiter keyed by client IP.
//!
//! Each client gets `limit` requests per `window`; the window starts with the
//! client's first request and is forgotten once it has elapsed. Counters live
//! in process memory, so every API process limits on its own.

use crate::errors::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::warn;

/// Windows kept before expired ones are swept out.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed per window. `0` turns limiting off.
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn disabled() -> Self {
        Self {
            limit: 0,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Arc<Mutex<HashMap<IpAddr, Window>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.limit > 0
    }

    /// Count one request from `client` at `now`.
    ///
    /// Returns the seconds until the client's window resets when it is over
    /// the limit.
    pub async fn check(&self, client: IpAddr, now: Instant) -> Result<(), u64> {
        if !self.enabled() {
            return Ok(());
        }
        let window_len = self.config.window;
        let mut windows = self.windows.lock().await;
        if windows.len() >= SWEEP_THRESHOLD {
            windows.retain(|_, w| now.duration_since(w.started) < window_len);
        }

        let window = windows.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= window_len {
            window.started = now;
            window.count = 0;
        }
        window.count += 1;

        if window.count > self.config.limit {
            let left = window_len.saturating_sub(now.duration_since(window.started));
            // Round up so a client waiting `retry_after` lands in a new window.
            let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
            return Err(secs.max(1));
        }
        Ok(())
    }
}

/// Middleware applied to every route.
///
/// The client is the peer address from `ConnectInfo`; requests that arrive
/// without one (in-process callers) share a single window.
pub async fn limit_by_ip(State(limiter): State<RateLimiter>, request: Request, next: Next) -> Response {
    if !limiter.enabled() {
        return next.run(request).await;
    }
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    match limiter.check(client, Instant::now()).await {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            warn!(client = %client, path = %request.uri().path(), retry_after, "rate limit exceeded");
            AppError::RateLimited { retry_after }.into_response()
        }
    }
}
