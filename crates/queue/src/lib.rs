//! Sluice work queue: per-key deduplication, delayed adds and per-key backoff.

#![forbid(unsafe_code)]

pub mod limiter;
mod queue;

pub use limiter::{
    default_controller_rate_limiter, BucketRateLimiter, ItemExponentialFailureRateLimiter, MaxOfRateLimiter,
    RateLimiter, RateLimiterConfig, MAX_BUCKET_WAIT,
};
pub use queue::RateLimitingQueue;
