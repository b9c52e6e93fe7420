use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use nimbus_service::config::RateLimit;
use nimbus_service::metric;
use parking_lot::Mutex;

use super::error::ApiErrorResponse;

/// Clients which sent nothing within the window are dropped once this many are tracked.
const PURGE_THRESHOLD: usize = 10_000;

static RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
static RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");

/// A per-client sliding window request limit.
///
/// Clones share the same request log.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    name: &'static str,
    message: &'static str,
    limit: RateLimit,
    clients: Arc<Mutex<HashMap<IpAddr, VecDeque<Instant>>>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, limit: RateLimit, message: &'static str) -> Self {
        Self {
            name,
            message,
            limit,
            clients: Default::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limit.max_requests > 0
    }

    /// Records a request of `client` at `now`.
    ///
    /// Returns the number of requests the client has left in the current window, or how long it
    /// has to wait until the next request is allowed.
    pub fn check(&self, client: IpAddr, now: Instant) -> Result<u32, Duration> {
        let window = self.limit.window;
        let mut clients = self.clients.lock();

        if clients.len() >= PURGE_THRESHOLD && !clients.contains_key(&client) {
            clients.retain(|_, requests| {
                requests
                    .back()
                    .is_some_and(|last| now.duration_since(*last) < window)
            });
        }

        let requests = clients.entry(client).or_default();
        while let Some(oldest) = requests.front() {
            if now.duration_since(*oldest) < window {
                break;
            }
            requests.pop_front();
        }

        let sent = requests.len() as u32;
        if sent >= self.limit.max_requests {
            let oldest = requests.front().copied().unwrap_or(now);
            return Err(window.saturating_sub(now.duration_since(oldest)));
        }

        requests.push_back(now);
        Ok(self.limit.max_requests - sent - 1)
    }

    fn rejection(&self, retry_after: Duration) -> Response {
        metric!(counter("requests.rate_limited") += 1, "limit" => self.name);

        let body = ApiErrorResponse {
            success: false,
            error: Some(self.message.to_owned()),
            causes: None,
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        // round up, so that clients do not retry a moment too early
        let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(seconds.max(1)));
        response
    }
}

/// Rejects requests of clients which exceeded the limit with `429 Too Many Requests`.
///
/// Clients are identified by their IP address, which requires the app to be served with
/// [`ConnectInfo`]. Requests without it are not limited.
pub async fn limit_requests(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let Some(client) = client.filter(|_| limiter.is_enabled()) else {
        return next.run(request).await;
    };

    match limiter.check(client, Instant::now()) {
        Ok(remaining) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(
                RATELIMIT_LIMIT.clone(),
                HeaderValue::from(limiter.limit.max_requests),
            );
            headers.insert(RATELIMIT_REMAINING.clone(), HeaderValue::from(remaining));
            response
        }
        Err(retry_after) => {
            tracing::debug!("Client {} exceeded the {} rate limit", client, limiter.name);
            limiter.rejection(retry_after)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn limiter(max_requests: u32) -> RateLimiter {
        let limit = RateLimit {
            window: Duration::from_secs(60),
            max_requests,
        };
        RateLimiter::new("test", limit, "slow down")
    }

    #[test]
    fn test_sliding_window() {
        let limiter = limiter(2);
        let client = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let start = Instant::now();

        assert_eq!(limiter.check(client, start), Ok(1));
        assert_eq!(
            limiter.check(client, start + Duration::from_secs(20)),
            Ok(0)
        );
        assert_eq!(
            limiter.check(client, start + Duration::from_secs(30)),
            Err(Duration::from_secs(30))
        );

        // the first request left the window
        assert_eq!(
            limiter.check(client, start + Duration::from_secs(60)),
            Ok(0)
        );
        assert!(
            limiter
                .check(client, start + Duration::from_secs(61))
                .is_err()
        );
    }

    #[test]
    fn test_clients_are_separate() {
        let limiter = limiter(1);
        let now = Instant::now();
        let first = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let second = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        assert!(limiter.check(first, now).is_ok());
        assert!(limiter.check(first, now).is_err());
        assert!(limiter.check(second, now).is_ok());

        // clones share the request log
        assert!(limiter.clone().check(second, now).is_err());
    }

    #[test]
    fn test_rejection() {
        let response = limiter(1).rejection(Duration::from_millis(2500));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");
    }
}
