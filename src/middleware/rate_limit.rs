//! Per-IP request throttling for the Compliance API.
//!
//! The review endpoints call out to the Reasoner Gateway on every request;
//! a client hammering `/oracle/analyze` can exhaust the configured LLM
//! budget long before anything else in the stack notices. This sits in
//! front of the router and counts requests per source IP in a fixed
//! window, rejecting once the window's quota is spent.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

struct Window {
    count: u32,
    started_at: Instant,
}

/// Shared throttle state, cheap to clone (one `Arc` behind it) into axum's
/// `State` extractor.
#[derive(Clone)]
pub struct RateLimitLayer {
    config: RateLimitConfig,
    windows: Arc<Mutex<HashMap<IpAddr, Window>>>,
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Counts this call against `ip`'s current window, rolling the window
    /// over if it has expired. `Err` carries how long until the window
    /// resets.
    fn admit(&self, ip: IpAddr) -> Result<(), Duration> {
        let mut windows = self.windows.lock();
        let now = Instant::now();
        let window = windows.entry(ip).or_insert_with(|| Window {
            count: 0,
            started_at: now,
        });

        if now.duration_since(window.started_at) >= self.config.window {
            window.count = 0;
            window.started_at = now;
        }

        window.count += 1;
        if window.count > self.config.max_requests {
            Err((window.started_at + self.config.window).saturating_duration_since(now))
        } else {
            Ok(())
        }
    }

    /// Drops windows idle for more than twice the window length. Call
    /// periodically from a background task so the map doesn't grow
    /// unbounded against a stream of distinct source IPs.
    pub fn evict_idle(&self) {
        let mut windows = self.windows.lock();
        let now = Instant::now();
        let window = self.config.window;
        windows.retain(|_, w| now.duration_since(w.started_at) < window * 2);
    }
}

pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    axum::extract::State(limiter): axum::extract::State<RateLimitLayer>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = addr.ip();
    let path = request.uri().path().to_string();

    match limiter.admit(ip) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            warn!(
                ip = %ip,
                path = %path,
                retry_after_secs = retry_after.as_secs(),
                "throttled request to compliance API"
            );
            let body = serde_json::json!({
                "error": "rate_limit_exceeded",
                "message": format!("too many requests; retry after {}s", retry_after.as_secs()),
            });
            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after.as_secs().to_string())],
                axum::Json(body),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(octet: u8) -> IpAddr {
        std::net::Ipv4Addr::new(10, 0, 0, octet).into()
    }

    #[test]
    fn admits_requests_within_quota() {
        let limiter = RateLimitLayer::new(RateLimitConfig {
            max_requests: 3,
            window: Duration::from_secs(60),
        });
        let client = ip(1);
        for _ in 0..3 {
            assert!(limiter.admit(client).is_ok());
        }
    }

    #[test]
    fn throttles_once_quota_is_spent() {
        let limiter = RateLimitLayer::new(RateLimitConfig {
            max_requests: 2,
            window: Duration::from_secs(60),
        });
        let client = ip(2);
        assert!(limiter.admit(client).is_ok());
        assert!(limiter.admit(client).is_ok());
        assert!(limiter.admit(client).is_err());
    }

    #[test]
    fn separate_ips_get_independent_quotas() {
        let limiter = RateLimitLayer::new(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
        });
        let a = ip(3);
        let b = ip(4);
        assert!(limiter.admit(a).is_ok());
        assert!(limiter.admit(b).is_ok());
        assert!(limiter.admit(a).is_err());
    }

    #[test]
    fn evict_idle_drops_only_stale_windows() {
        let limiter = RateLimitLayer::new(RateLimitConfig {
            max_requests: 5,
            window: Duration::from_millis(10),
        });
        let client = ip(5);
        limiter.admit(client).unwrap();
        std::thread::sleep(Duration::from_millis(25));
        limiter.evict_idle();
        assert!(limiter.windows.lock().is_empty());
    }
}
