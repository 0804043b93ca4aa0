//! Per-client rate limiting using the token bucket algorithm
//!
//! Each client IP gets a bucket holding `requests` tokens that refills evenly
//! over `window_secs`. A request consumes one token; an empty bucket means
//! 429 with a `Retry-After` hint.

use std::{
    net::{IpAddr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use crate::{config::RateLimit, error::ApiError};

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(limit: RateLimit) -> Self {
        let capacity = f64::from(limit.requests);
        Self {
            tokens: capacity,
            capacity,
            refill_rate: capacity / limit.window().as_secs_f64().max(f64::MIN_POSITIVE),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = elapsed.mul_add(self.refill_rate, self.tokens).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else if self.refill_rate > 0.0 {
            Err(Duration::try_from_secs_f64((1.0 - self.tokens) / self.refill_rate)
                .unwrap_or(Duration::MAX))
        } else {
            Err(Duration::MAX)
        }
    }

    fn is_full(&mut self) -> bool {
        self.refill();
        self.tokens >= self.capacity
    }
}

/// Token buckets keyed by client address.
#[derive(Debug)]
pub struct RateLimiter {
    limit: RateLimit,
    message: &'static str,
    buckets: DashMap<IpAddr, Arc<parking_lot::Mutex<TokenBucket>>>,
}

impl RateLimiter {
    /// `message` is what a limited client is told.
    #[must_use]
    pub fn new(limit: RateLimit, message: &'static str) -> Self {
        Self {
            limit,
            message,
            buckets: DashMap::new(),
        }
    }

    fn bucket(&self, client: IpAddr) -> Arc<parking_lot::Mutex<TokenBucket>> {
        self.buckets
            .entry(client)
            .or_insert_with(|| Arc::new(parking_lot::Mutex::new(TokenBucket::new(self.limit))))
            .clone()
    }

    /// `Err` carries how long until the client may try again.
    pub fn check(&self, client: IpAddr) -> Result<(), Duration> {
        let bucket = self.bucket(client);
        let result = bucket.lock().try_consume();

        if let Err(wait) = result {
            tracing::debug!(
                %client,
                wait_seconds = wait.as_secs_f64(),
                "Rate limit exceeded"
            );
        }
        result
    }

    /// Forgets clients whose buckets have fully refilled; they would get a
    /// fresh, full bucket anyway.
    pub fn evict_idle(&self) {
        self.buckets.retain(|_, bucket| !bucket.lock().is_full());
    }

    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.limit.window()
    }
}

/// The peer address when the server was started with connect info.
fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED), |ConnectInfo(addr)| {
            addr.ip()
        })
}

/// Middleware rejecting requests from clients over their limit.
pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    match limiter.check(client_ip(&request)) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => ApiError::RateLimited {
            message: limiter.message,
            retry_after,
        }
        .into_response(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const LIMIT: RateLimit = RateLimit {
        requests: 10,
        window_secs: 300,
    };

    #[test]
    fn test_token_bucket_consume() {
        let mut bucket = TokenBucket::new(LIMIT);

        for _ in 0..10 {
            assert!(bucket.try_consume().is_ok());
        }

        let wait = bucket.try_consume().unwrap_err();
        assert!(wait > Duration::from_secs(29) && wait <= Duration::from_secs(30));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Time-based test not compatible with Miri")]
    fn test_token_bucket_refill() {
        let mut bucket = TokenBucket::new(LIMIT);
        for _ in 0..10 {
            bucket.try_consume().unwrap();
        }
        assert!(bucket.try_consume().is_err());

        bucket.last_refill = Instant::now().checked_sub(Duration::from_secs(60)).unwrap();
        bucket.refill();

        // 10 tokens per 300s is one every 30s
        assert!(bucket.tokens >= 1.9 && bucket.tokens <= 2.1);
        assert!(bucket.try_consume().is_ok());
    }

    #[test]
    fn test_zero_request_limit_always_rejects() {
        let mut bucket = TokenBucket::new(RateLimit {
            requests: 0,
            window_secs: 60,
        });
        assert_eq!(bucket.try_consume(), Err(Duration::MAX));
    }

    #[test]
    fn test_clients_are_limited_independently() {
        let limiter = RateLimiter::new(LIMIT, "slow down");
        let first: IpAddr = "192.0.2.1".parse().unwrap();
        let second: IpAddr = "192.0.2.2".parse().unwrap();

        for _ in 0..10 {
            assert!(limiter.check(first).is_ok());
        }
        assert!(limiter.check(first).is_err());
        assert!(limiter.check(second).is_ok());
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    #[cfg_attr(miri, ignore = "Time-based test not compatible with Miri")]
    fn test_evict_idle_keeps_active_clients() {
        let limiter = RateLimiter::new(LIMIT, "slow down");
        let active: IpAddr = "192.0.2.1".parse().unwrap();
        let idle: IpAddr = "192.0.2.2".parse().unwrap();

        limiter.check(active).unwrap();
        limiter.check(idle).unwrap();
        limiter.bucket(idle).lock().last_refill =
            Instant::now().checked_sub(Duration::from_secs(300)).unwrap();

        limiter.evict_idle();

        assert_eq!(limiter.tracked_clients(), 1);
        assert!(limiter.buckets.contains_key(&active));
    }

    #[test]
    fn test_zero_request_limit_renders_429() {
        let limiter = RateLimiter::new(
            RateLimit {
                requests: 0,
                window_secs: 60,
            },
            "closed",
        );
        let client: IpAddr = "192.0.2.9".parse().unwrap();

        let retry_after = limiter.check(client).unwrap_err();
        assert_eq!(retry_after, Duration::MAX);

        let response = ApiError::RateLimited {
            message: "closed",
            retry_after,
        }
        .into_response();
        assert_eq!(response.status(), axum::http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers()[axum::http::header::RETRY_AFTER],
            u64::MAX.to_string().as_str()
        );
    }

    #[test]
    fn test_enormous_window_does_not_overflow_wait() {
        let mut bucket = TokenBucket::new(RateLimit {
            requests: 1,
            window_secs: u64::MAX,
        });
        bucket.try_consume().unwrap();

        assert_eq!(bucket.try_consume(), Err(Duration::MAX));
    }
}
