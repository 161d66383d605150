//! Network resiliency stack: admission control, retry policy and the request
//! executor every strategy sends its traffic through.

pub mod client;
mod error;
mod executor;
pub mod headers;
mod rate_limiter;
mod retry;

pub use client::{ClientCache, HttpTimeouts, build_client};
pub use error::{AttemptError, RequestError};
pub use executor::{ExecutorResponse, Payload, RequestBody, RequestExecutor, RequestSpec};
pub use rate_limiter::{
    ADMISSION_POLL_INTERVAL, BucketConfig, RateLimitExceeded, RateLimiter, TokenBucket,
};
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy,
    classify_attempt, parse_retry_after,
};

// Note: no module-local Result alias; spell out `Result<T, RequestError>`.
