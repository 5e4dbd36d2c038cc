/// Per-client rate limiting
use crate::{
    config::RateLimitConfig,
    context::AppContext,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter as GovernorLimiter,
};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
};

type KeyedLimiter = GovernorLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Token bucket per client IP
pub struct RateLimiter {
    enabled: bool,
    limiter: KeyedLimiter,
    clock: DefaultClock,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let rps = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rps).allow_burst(burst);

        Self {
            enabled: config.enabled,
            limiter: GovernorLimiter::keyed(quota),
            clock: DefaultClock::default(),
        }
    }

    /// Take one request from `client`'s bucket
    pub fn check(&self, client: IpAddr) -> ApiResult<()> {
        if !self.enabled {
            return Ok(());
        }

        self.limiter.check_key(&client).map_err(|not_until| {
            ApiError::RateLimitExceeded {
                retry_after: not_until.wait_time_from(self.clock.now()),
            }
        })
    }

    /// Drop buckets that have fully refilled
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }
}

/// Peer address, then the first `X-Forwarded-For` hop, then unspecified
pub fn client_ip(request: &Request) -> IpAddr {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip();
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client = client_ip(&request);
    if let Err(e) = ctx.rate_limiter.check(client) {
        tracing::debug!(client = %client, "rate limit exceeded");
        return Err(e);
    }

    Ok(next.run(request).await)
}
