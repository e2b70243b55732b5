//! Rate limiting middleware using governor and `tower_governor`.
//!
//! - `auth_rate_limiter`: sign-in and registration (~10/min per client)
//! - `payments_rate_limiter`: checkout submission and the `/api` payment
//!   proxy (~60/min per client)

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use governor::clock::QuantaInstant;
use governor::middleware::NoOpMiddleware;
use tower_governor::{GovernorError, GovernorLayer, governor::GovernorConfigBuilder};

/// Forwarding headers consulted for the client address, in order.
const CLIENT_IP_HEADERS: &[&str] = &["cf-connecting-ip", "x-forwarded-for", "x-real-ip"];

/// Key extractor that reads the client address set by the fronting proxy.
///
/// `x-forwarded-for` may hold a chain; the first entry is the client. Without
/// any forwarding header the peer address of the connection is used.
#[derive(Clone, Copy)]
pub struct ClientIpKeyExtractor;

fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    CLIENT_IP_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
    })
}

impl tower_governor::key_extractor::KeyExtractor for ClientIpKeyExtractor {
    type Key = IpAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        client_ip(req.headers())
            .or_else(|| {
                req.extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|info| info.0.ip())
            })
            .ok_or(GovernorError::UnableToExtractKey)
    }
}

/// Rate limiter layer type for Axum.
pub type RateLimiterLayer =
    GovernorLayer<ClientIpKeyExtractor, NoOpMiddleware<QuantaInstant>, axum::body::Body>;

fn limiter(replenish_secs: u64, burst: u32) -> RateLimiterLayer {
    let config = GovernorConfigBuilder::default()
        .key_extractor(ClientIpKeyExtractor)
        .per_second(replenish_secs)
        .burst_size(burst)
        .finish()
        .expect("rate limiter config with non-zero period and burst is valid");
    GovernorLayer::new(Arc::new(config))
}

/// Rate limiter for auth endpoints: 1 request every 6 seconds, burst of 5.
///
/// # Panics
///
/// Never panics: the period and burst are non-zero constants.
#[must_use]
pub fn auth_rate_limiter() -> RateLimiterLayer {
    limiter(6, 5)
}

/// Rate limiter for payment endpoints: 1 request per second, burst of 20.
///
/// # Panics
///
/// Never panics: the period and burst are non-zero constants.
#[must_use]
pub fn payments_rate_limiter() -> RateLimiterLayer {
    limiter(1, 20)
}
