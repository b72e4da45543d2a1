//! Rate Limiting Module
//!
//! Fixed-window rate limiting keyed by client IP address, scoped to the chat
//! route. Stacked per-minute, per-hour and per-day windows all apply; a
//! request is admitted only when every window has remaining quota.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::net::SocketAddr;
use tracing::warn;

use crate::api::app_state::AppState;
use crate::config::config::RateLimitConfig;
use crate::error::AppError;

/// Fallback client key when no address is available
const UNKNOWN_CLIENT: &str = "unknown";

/// Rate limit decision
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitDecision {
    /// Request is admitted
    Allowed,
    /// Request is rejected
    Limited {
        /// Window that ran out of quota
        window: &'static str,
        /// Seconds until the window resets
        retry_after: u64,
    },
}

/// One fixed window counter
#[derive(Debug, Clone)]
struct WindowCounter {
    window_start: DateTime<Utc>,
    count: u32,
}

impl WindowCounter {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            count: 0,
        }
    }

    /// Reset the counter if the window has elapsed
    fn roll(&mut self, now: DateTime<Utc>, period: Duration) {
        if now - self.window_start >= period {
            self.window_start = now;
            self.count = 0;
        }
    }

    fn seconds_until_reset(&self, now: DateTime<Utc>, period: Duration) -> u64 {
        let elapsed = now - self.window_start;
        (period - elapsed).num_seconds().max(1) as u64
    }
}

/// Per-client window set
#[derive(Debug, Clone)]
struct ClientWindows {
    minute: WindowCounter,
    hour: WindowCounter,
    day: WindowCounter,
}

impl ClientWindows {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            minute: WindowCounter::new(now),
            hour: WindowCounter::new(now),
            day: WindowCounter::new(now),
        }
    }
}

/// In-memory fixed-window rate limiter
///
/// Counters live in a concurrent map; the per-client entry is held exclusively
/// for the whole check-and-increment, so concurrent requests from the same
/// client cannot lose updates.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, ClientWindows>,
}

impl RateLimiter {
    /// Create new rate limiter
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Create development rate limiter (disabled)
    pub fn development() -> Self {
        Self::new(RateLimitConfig::development())
    }

    /// Create production rate limiter
    pub fn production() -> Self {
        Self::new(RateLimitConfig::production())
    }

    /// Check quota for a client and record the request if admitted
    ///
    /// All windows are checked first; nothing is incremented on rejection.
    pub fn check_and_record(&self, client_key: &str) -> RateLimitDecision {
        if !self.config.enabled {
            return RateLimitDecision::Allowed;
        }

        let now = Utc::now();
        let mut entry = self
            .windows
            .entry(client_key.to_string())
            .or_insert_with(|| ClientWindows::new(now));

        entry.minute.roll(now, Duration::minutes(1));
        entry.hour.roll(now, Duration::hours(1));
        entry.day.roll(now, Duration::days(1));

        if entry.minute.count >= self.config.requests_per_minute {
            return RateLimitDecision::Limited {
                window: "minute",
                retry_after: entry.minute.seconds_until_reset(now, Duration::minutes(1)),
            };
        }
        if entry.hour.count >= self.config.requests_per_hour {
            return RateLimitDecision::Limited {
                window: "hour",
                retry_after: entry.hour.seconds_until_reset(now, Duration::hours(1)),
            };
        }
        if entry.day.count >= self.config.requests_per_day {
            return RateLimitDecision::Limited {
                window: "day",
                retry_after: entry.day.seconds_until_reset(now, Duration::days(1)),
            };
        }

        entry.minute.count += 1;
        entry.hour.count += 1;
        entry.day.count += 1;

        RateLimitDecision::Allowed
    }

    /// Clear all counters (for testing)
    pub fn clear(&self) {
        self.windows.clear();
    }
}

/// Extract the client key from a request
///
/// Order: first `X-Forwarded-For` entry, then `X-Real-IP`, then the
/// connection peer address. Falls back to a shared `"unknown"` key.
pub fn extract_client_key(req: &Request<Body>) -> String {
    if let Some(forwarded) = req.headers().get("X-Forwarded-For") {
        if let Ok(value) = forwarded.to_str() {
            let first = value.split(',').next().unwrap_or(value).trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = req.headers().get("X-Real-IP") {
        if let Ok(value) = real_ip.to_str() {
            if !value.trim().is_empty() {
                return value.trim().to_string();
            }
        }
    }

    if let Some(ConnectInfo(peer)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return peer.ip().to_string();
    }

    UNKNOWN_CLIENT.to_string()
}

/// Axum middleware enforcing the rate limit on the chat route
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let client_key = extract_client_key(&req);

    match state.rate_limiter.check_and_record(&client_key) {
        RateLimitDecision::Allowed => next.run(req).await,
        RateLimitDecision::Limited {
            window,
            retry_after,
        } => {
            warn!("Rate limit exceeded for {} ({} window)", client_key, window);
            state.metrics.record_rate_limited();
            AppError::RateLimited { retry_after }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_minute: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            enabled: true,
            requests_per_minute: per_minute,
            requests_per_hour: 1000,
            requests_per_day: 10000,
        })
    }

    #[test]
    fn test_sixth_request_in_minute_rejected() {
        let limiter = limiter(5);

        for _ in 0..5 {
            assert_eq!(
                limiter.check_and_record("203.0.113.1"),
                RateLimitDecision::Allowed
            );
        }

        match limiter.check_and_record("203.0.113.1") {
            RateLimitDecision::Limited { window, .. } => assert_eq!(window, "minute"),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_other_client_unaffected() {
        let limiter = limiter(5);

        for _ in 0..6 {
            let _ = limiter.check_and_record("203.0.113.1");
        }

        assert_eq!(
            limiter.check_and_record("203.0.113.2"),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn test_rejection_does_not_consume_quota() {
        let limiter = limiter(1);

        assert_eq!(
            limiter.check_and_record("203.0.113.1"),
            RateLimitDecision::Allowed
        );
        // 剩余窗口不应因拒绝而继续累积
        for _ in 0..3 {
            assert!(matches!(
                limiter.check_and_record("203.0.113.1"),
                RateLimitDecision::Limited { .. }
            ));
        }
    }

    #[test]
    fn test_hour_window_stacks_with_minute_window() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: true,
            requests_per_minute: 100,
            requests_per_hour: 2,
            requests_per_day: 10000,
        });

        assert_eq!(
            limiter.check_and_record("203.0.113.1"),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_and_record("203.0.113.1"),
            RateLimitDecision::Allowed
        );
        match limiter.check_and_record("203.0.113.1") {
            RateLimitDecision::Limited { window, .. } => assert_eq!(window, "hour"),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_disabled_limiter_admits_everything() {
        let limiter = RateLimiter::development();
        for _ in 0..1000 {
            assert_eq!(
                limiter.check_and_record("203.0.113.1"),
                RateLimitDecision::Allowed
            );
        }
    }

    #[test]
    fn test_window_rolls_after_period() {
        let mut counter = WindowCounter::new(Utc::now() - Duration::seconds(61));
        counter.count = 5;

        counter.roll(Utc::now(), Duration::minutes(1));
        assert_eq!(counter.count, 0);
    }

    #[test]
    fn test_extract_client_key_prefers_forwarded_for() {
        let req = Request::builder()
            .header("X-Forwarded-For", "198.51.100.7, 10.0.0.1")
            .header("X-Real-IP", "198.51.100.8")
            .body(Body::empty())
            .unwrap();

        assert_eq!(extract_client_key(&req), "198.51.100.7");
    }

    #[test]
    fn test_extract_client_key_falls_back_to_unknown() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_client_key(&req), UNKNOWN_CLIENT);
    }
}
