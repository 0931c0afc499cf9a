//! Per-client token bucket limiter applied to every route.
//!
//! Clients are keyed by IP address.  When no address can be determined
//! (no socket info and no proxy headers) the caller's user id is used, and
//! anonymous requests without either pass through.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use foodbridge_shared::constants::USER_ID_HEADER;
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::ServerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    Ip(IpAddr),
    User(String),
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<ClientKey, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.rate_limit_per_sec, config.rate_limit_burst)
    }

    pub async fn check(&self, key: ClientKey) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::new(self.capacity));
        bucket.try_consume(self.rate, self.capacity)
    }

    /// Drop buckets idle for longer than `max_idle_secs`.
    pub async fn purge_stale(&self, max_idle_secs: f64) -> usize {
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        let now = Instant::now();
        buckets.retain(|_, bucket| {
            now.duration_since(bucket.last_refill).as_secs_f64() < max_idle_secs
        });
        before - buckets.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(key) = client_key(&req) {
        if !limiter.check(key.clone()).await {
            warn!(client = ?key, "Rate limit exceeded");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}

/// ConnectInfo first, then X-Forwarded-For, then X-Real-IP, then the
/// caller id header.
fn client_key<B>(req: &Request<B>) -> Option<ClientKey> {
    if let Some(connect_info) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(ClientKey::Ip(connect_info.0.ip()));
    }

    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());

    if let Some(first) = header("x-forwarded-for").and_then(|v| v.split(',').next()) {
        if let Ok(ip) = first.trim().parse::<IpAddr>() {
            return Some(ClientKey::Ip(ip));
        }
    }

    if let Some(ip) = header("x-real-ip").and_then(|v| v.trim().parse::<IpAddr>().ok()) {
        return Some(ClientKey::Ip(ip));
    }

    header(USER_ID_HEADER)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| ClientKey::User(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> ClientKey {
        ClientKey::Ip(s.parse().unwrap())
    }

    #[tokio::test]
    async fn test_rate_limiter_allows_burst() {
        let limiter = RateLimiter::new(10.0, 5.0);
        for _ in 0..5 {
            assert!(limiter.check(ip("127.0.0.1")).await);
        }
        assert!(!limiter.check(ip("127.0.0.1")).await);
    }

    #[tokio::test]
    async fn test_rate_limiter_separate_clients() {
        let limiter = RateLimiter::new(10.0, 2.0);
        assert!(limiter.check(ip("10.0.0.1")).await);
        assert!(limiter.check(ip("10.0.0.1")).await);
        assert!(!limiter.check(ip("10.0.0.1")).await);

        assert!(limiter.check(ip("10.0.0.2")).await);
        assert!(limiter.check(ClientKey::User("n1".into())).await);
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let limiter = RateLimiter::new(10.0, 5.0);
        assert!(limiter.check(ip("192.168.1.1")).await);
        assert_eq!(limiter.purge_stale(0.0).await, 1);
        assert!(limiter.buckets.lock().await.is_empty());
    }

    #[test]
    fn test_client_key_precedence() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .header(USER_ID_HEADER, "n1")
            .body(())
            .unwrap();
        assert_eq!(client_key(&req), Some(ip("203.0.113.9")));

        let req = Request::builder()
            .header(USER_ID_HEADER, " d7 ")
            .body(())
            .unwrap();
        assert_eq!(client_key(&req), Some(ClientKey::User("d7".into())));

        let req = Request::builder().body(()).unwrap();
        assert_eq!(client_key(&req), None);
    }
}
