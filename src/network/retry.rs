//! Retry logic with exponential backoff for failed request attempts.
//!
//! Every failed attempt is classified into a [`FailureType`], which decides
//! who gets blamed for it (proxy, identity, nobody). The [`RetryPolicy`] then
//! decides whether another attempt is allowed and how long to wait first.
//!
//! # Delay Calculation
//!
//! ```text
//! delay(attempt) = base_delay * 2^attempt + jitter      (attempt is 0-indexed)
//! jitter         ∈ [0, base_delay / 4]
//! ```
//!
//! The jitter bound keeps successive delays strictly increasing: the gap between
//! two consecutive un-jittered delays is at least `base_delay`, which is larger
//! than any jitter sample.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use sharelink_core::network::{FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::new(2, Duration::from_millis(100));
//! assert!(matches!(
//!     policy.should_retry(FailureType::RateLimited, 0),
//!     RetryDecision::Retry { .. }
//! ));
//! assert!(matches!(
//!     policy.should_retry(FailureType::RateLimited, 2),
//!     RetryDecision::DoNotRetry { .. }
//! ));
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use super::error::AttemptError;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default base delay for exponential backoff (2 seconds).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Maximum Retry-After value honored (1 hour).
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// HTTP 429. The service throttled us; neither proxy nor identity is at fault.
    RateLimited,

    /// HTTP 401/403. The service rejected the client; the identity is suspect
    /// and so is the egress address.
    Rejected,

    /// Any other non-2xx status, timeout, or transport error. Blames the proxy.
    Transient,
}

impl FailureType {
    /// Whether this failure counts against the proxy that carried the request.
    #[must_use]
    pub fn blames_proxy(self) -> bool {
        !matches!(self, Self::RateLimited)
    }

    /// Whether this failure counts against the identity presented.
    #[must_use]
    pub fn blames_identity(self) -> bool {
        matches!(self, Self::Rejected)
    }
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// 0-indexed number of the attempt about to be made.
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Retry budget and backoff configuration.
///
/// `max_retries` counts retries, so a request is attempted at most
/// `max_retries + 1` times.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy.
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Creates a policy that never retries.
    #[must_use]
    pub fn no_retries() -> Self {
        Self::new(0, DEFAULT_BASE_DELAY)
    }

    /// Returns the number of retries allowed after the first attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the total number of attempts allowed.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Returns the base backoff delay.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Decides whether to retry after the 0-indexed `attempt` failed.
    #[instrument(skip(self), fields(max_retries = self.max_retries))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if attempt >= self.max_retries {
            debug!(attempt, "retry budget exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("max retries ({}) exhausted", self.max_retries),
            };
        }

        let delay = self.backoff_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates `base_delay * 2^attempt` plus jitter.
    ///
    /// Growth is unbounded in `attempt`; the retry cap is what bounds total latency.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let exponential = self.base_delay.checked_mul(factor).unwrap_or(Duration::MAX);
        exponential.saturating_add(self.jitter())
    }

    fn jitter(&self) -> Duration {
        let max_jitter_ms = u64::try_from(self.base_delay.as_millis() / 4).unwrap_or(u64::MAX);
        if max_jitter_ms == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
        Duration::from_millis(jitter_ms)
    }
}

/// Classifies a failed attempt.
///
/// | Failure | Type |
/// |---------|------|
/// | 429 | `RateLimited` |
/// | 401, 403 | `Rejected` |
/// | other status | `Transient` |
/// | timeout, transport, body | `Transient` |
#[must_use]
pub fn classify_attempt(error: &AttemptError) -> FailureType {
    match error {
        AttemptError::Status { status: 429, .. } => FailureType::RateLimited,
        AttemptError::Status {
            status: 401 | 403, ..
        } => FailureType::Rejected,
        AttemptError::Status { .. }
        | AttemptError::Timeout
        | AttemptError::Transport(_)
        | AttemptError::Body(_) => FailureType::Transient,
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds and HTTP-date (RFC 7231). Returns `None` if the
/// value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use sharelink_core::network::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<u64>() {
        let duration = Duration::from_secs(seconds);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    let datetime = httpdate::parse_http_date(header_value).ok()?;
    let duration = datetime
        .duration_since(std::time::SystemTime::now())
        .unwrap_or(Duration::ZERO);
    Some(duration.min(MAX_RETRY_AFTER))
}
