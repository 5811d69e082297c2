//! Rate limiting middleware using token bucket algorithm

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use kbqa_common::config::RateLimitConfig;
use kbqa_common::errors::{AppError, Result};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Global limiter shared by every route
#[derive(Clone)]
pub struct GlobalRateLimiter {
    limiter: Arc<DefaultDirectRateLimiter>,
    requests_per_second: u32,
}

/// Create a new rate limiter
pub fn create_rate_limiter(config: &RateLimitConfig) -> Result<GlobalRateLimiter> {
    let per_second = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
        AppError::Configuration {
            message: "rate_limit.requests_per_second must be positive".to_string(),
        }
    })?;
    let burst = NonZeroU32::new(config.burst).ok_or_else(|| AppError::Configuration {
        message: "rate_limit.burst must be positive".to_string(),
    })?;

    let quota = Quota::per_second(per_second).allow_burst(burst);

    Ok(GlobalRateLimiter {
        limiter: Arc::new(RateLimiter::direct(quota)),
        requests_per_second: config.requests_per_second,
    })
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(limiter): State<GlobalRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response> {
    match limiter.limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
            Err(AppError::RateLimited {
                limit: limiter.requests_per_second,
            })
        }
    }
}
