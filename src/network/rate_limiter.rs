//! Admission control with global and per-caller token buckets.
//!
//! This module provides the [`RateLimiter`] struct which gates how many
//! extractions may start per unit time, both overall and per caller.
//!
//! # Overview
//!
//! Two buckets must each hold at least one token for a request to be admitted:
//! the global bucket shared by everyone, and the bucket of the calling
//! identifier (created lazily on first use, with a smaller capacity). If the
//! caller bucket is empty after the global bucket already gave up a token, that
//! token is refunded so no global capacity is lost.
//!
//! Buckets refill continuously and lazily: on each access, the elapsed time
//! since the last refill times the refill rate is added, capped at capacity.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use sharelink_core::network::{BucketConfig, RateLimiter};
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(
//!     BucketConfig::per_period(30, Duration::from_secs(60)),
//!     BucketConfig::per_period(10, Duration::from_secs(60)),
//! );
//!
//! if limiter.admit(Some("user-42"), Duration::from_secs(10)).await.is_ok() {
//!     // ... run the extraction
//! }
//! # }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Interval between admission attempts while waiting for tokens.
pub const ADMISSION_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Number of caller buckets above which idle, full buckets are swept.
const CALLER_SWEEP_THRESHOLD: usize = 4096;

/// Returned when admission could not be obtained before the timeout.
#[derive(Debug, Clone, Error)]
#[error("rate limit exceeded for {caller} after waiting {waited:?}\n  Suggestion: Wait a moment before sending more requests")]
pub struct RateLimitExceeded {
    /// The caller that was refused, or `global` for anonymous requests.
    pub caller: String,
    /// How long admission was attempted.
    pub waited: Duration,
}

/// Capacity and refill rate for a token bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    /// Maximum tokens the bucket can hold.
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_per_sec: f64,
}

impl BucketConfig {
    /// A bucket of `requests` tokens that refills completely over `period`.
    #[must_use]
    pub fn per_period(requests: u32, period: Duration) -> Self {
        let capacity = f64::from(requests);
        let period_secs = period.as_secs_f64();
        let refill_per_sec = if period_secs > 0.0 {
            capacity / period_secs
        } else {
            capacity
        };
        Self {
            capacity,
            refill_per_sec,
        }
    }
}

/// A continuously refilling token bucket.
///
/// The token count is always within `[0, capacity]`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    config: BucketConfig,
}

impl TokenBucket {
    /// Creates a full bucket.
    #[must_use]
    pub fn full(config: BucketConfig) -> Self {
        Self {
            tokens: config.capacity,
            last_refill: Instant::now(),
            config,
        }
    }

    /// Adds tokens for the time elapsed since the last refill.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.config.refill_per_sec).min(self.config.capacity);
        self.last_refill = now;
    }

    /// Refills, then takes one token if available.
    fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Returns one token, never exceeding capacity.
    fn refund(&mut self) {
        self.tokens = (self.tokens + 1.0).min(self.config.capacity);
    }

    /// Current token count (without refilling).
    #[must_use]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Whether the bucket is at capacity after refilling to `now`.
    fn is_full_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.tokens >= self.config.capacity
    }
}

#[derive(Debug)]
struct LimiterState {
    global: TokenBucket,
    callers: HashMap<String, TokenBucket>,
}

/// Dual token-bucket admission controller.
///
/// Designed to be wrapped in `Arc` and shared across tasks. All bucket
/// mutation happens under one lock, which makes the "both buckets or neither"
/// rule atomic.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    caller_config: BucketConfig,
    poll_interval: Duration,
    disabled: bool,
}

impl RateLimiter {
    /// Creates a limiter with the given global and per-caller buckets.
    #[must_use]
    #[instrument(skip_all, fields(global = global.capacity, caller = caller.capacity))]
    pub fn new(global: BucketConfig, caller: BucketConfig) -> Self {
        debug!("creating rate limiter");
        Self {
            state: Mutex::new(LimiterState {
                global: TokenBucket::full(global),
                callers: HashMap::new(),
            }),
            caller_config: caller,
            poll_interval: ADMISSION_POLL_INTERVAL,
            disabled: false,
        }
    }

    /// Creates a limiter that admits every request immediately.
    #[must_use]
    pub fn disabled() -> Self {
        let unlimited = BucketConfig {
            capacity: f64::MAX,
            refill_per_sec: f64::MAX,
        };
        Self {
            disabled: true,
            ..Self::new(unlimited, unlimited)
        }
    }

    /// Overrides the polling interval used by [`admit`](Self::admit).
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Tries to take one token from the global bucket and, when `caller` is
    /// given, one from the caller's bucket. Takes both or neither.
    pub async fn try_acquire(&self, caller: Option<&str>) -> bool {
        if self.disabled {
            return true;
        }

        let now = Instant::now();
        let mut state = self.state.lock().await;

        if !state.global.try_take(now) {
            return false;
        }

        let Some(caller) = caller else {
            return true;
        };

        if state.callers.len() >= CALLER_SWEEP_THRESHOLD && !state.callers.contains_key(caller) {
            sweep_full_buckets(&mut state.callers, now);
        }

        let caller_config = self.caller_config;
        let admitted = state
            .callers
            .entry(caller.to_string())
            .or_insert_with(|| TokenBucket::full(caller_config))
            .try_take(now);

        if !admitted {
            state.global.refund();
        }
        admitted
    }

    /// Waits until both buckets admit the request, polling at a fixed interval.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitExceeded`] when `timeout` elapses without admission.
    #[instrument(skip(self, caller), fields(caller = caller.unwrap_or("global")))]
    pub async fn admit(
        &self,
        caller: Option<&str>,
        timeout: Duration,
    ) -> Result<(), RateLimitExceeded> {
        let started = Instant::now();
        loop {
            if self.try_acquire(caller).await {
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= timeout {
                warn!(waited_ms = waited.as_millis(), "admission timed out");
                return Err(RateLimitExceeded {
                    caller: caller.unwrap_or("global").to_string(),
                    waited,
                });
            }

            let remaining = timeout.saturating_sub(waited);
            debug!(remaining_ms = remaining.as_millis(), "waiting for rate limit tokens");
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }

    /// Returns the whole tokens currently available to `caller`.
    ///
    /// A caller that has never been seen reports a full bucket.
    pub async fn remaining(&self, caller: &str) -> u32 {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let tokens = match state.callers.get_mut(caller) {
            Some(bucket) => {
                bucket.refill(now);
                bucket.tokens()
            }
            None => self.caller_config.capacity,
        };
        whole_tokens(tokens)
    }

    /// Number of per-caller buckets currently tracked.
    pub async fn tracked_callers(&self) -> usize {
        self.state.lock().await.callers.len()
    }
}

/// Drops caller buckets that have refilled to capacity.
///
/// A full bucket behaves exactly like a freshly created one, so removal is
/// lossless.
fn sweep_full_buckets(callers: &mut HashMap<String, TokenBucket>, now: Instant) {
    let before = callers.len();
    callers.retain(|_, bucket| !bucket.is_full_at(now));
    debug!(
        before,
        after = callers.len(),
        "swept idle caller rate-limit buckets"
    );
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_tokens(tokens: f64) -> u32 {
    tokens.floor().clamp(0.0, f64::from(u32::MAX)) as u32
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn limiter(global: u32, caller: u32) -> RateLimiter {
        RateLimiter::new(
            BucketConfig::per_period(global, Duration::from_secs(60)),
            BucketConfig::per_period(caller, Duration::from_secs(60)),
        )
    }

    // ==================== TokenBucket Tests ====================

    #[test]
    fn test_bucket_config_per_period() {
        let config = BucketConfig::per_period(30, Duration::from_secs(60));
        assert!((config.capacity - 30.0).abs() < f64::EPSILON);
        assert!((config.refill_per_sec - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_bucket_refill_capped_at_capacity() {
        tokio::time::pause();
        let mut bucket = TokenBucket::full(BucketConfig::per_period(2, Duration::from_secs(2)));
        assert!(bucket.try_take(Instant::now()));
        tokio::time::advance(Duration::from_secs(100)).await;
        bucket.refill(Instant::now());
        assert!((bucket.tokens() - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_bucket_refund_never_exceeds_capacity() {
        tokio::time::pause();
        let mut bucket = TokenBucket::full(BucketConfig::per_period(3, Duration::from_secs(3)));
        bucket.refund();
        assert!((bucket.tokens() - 3.0).abs() < f64::EPSILON);
    }

    // ==================== try_acquire Tests ====================

    #[tokio::test]
    async fn test_global_bucket_exhausts_then_refills() {
        tokio::time::pause();
        let limiter = limiter(2, 10);

        assert!(limiter.try_acquire(None).await);
        assert!(limiter.try_acquire(None).await);
        assert!(!limiter.try_acquire(None).await);

        // 2 tokens per 60s -> one token every 30s
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.try_acquire(None).await);
        assert!(!limiter.try_acquire(None).await);
    }

    #[tokio::test]
    async fn test_caller_bucket_smaller_than_global() {
        tokio::time::pause();
        let limiter = limiter(30, 2);

        assert!(limiter.try_acquire(Some("alice")).await);
        assert!(limiter.try_acquire(Some("alice")).await);
        assert!(!limiter.try_acquire(Some("alice")).await);

        // Another caller still has its own bucket
        assert!(limiter.try_acquire(Some("bob")).await);
    }

    #[tokio::test]
    async fn test_caller_rejection_refunds_global_token() {
        tokio::time::pause();
        let limiter = limiter(3, 1);

        assert!(limiter.try_acquire(Some("alice")).await);
        // Refused by alice's bucket; the global token taken for it is returned
        assert!(!limiter.try_acquire(Some("alice")).await);
        assert!(!limiter.try_acquire(Some("alice")).await);

        // Global still has 2 tokens
        assert!(limiter.try_acquire(None).await);
        assert!(limiter.try_acquire(None).await);
        assert!(!limiter.try_acquire(None).await);
    }

    #[tokio::test]
    async fn test_disabled_limiter_admits_everything() {
        let limiter = RateLimiter::disabled();
        assert!(limiter.is_disabled());
        for _ in 0..1000 {
            assert!(limiter.try_acquire(Some("alice")).await);
        }
    }

    // ==================== admit Tests ====================

    #[tokio::test]
    async fn test_admit_waits_for_refill() {
        tokio::time::pause();
        let limiter = limiter(1, 10);
        limiter.admit(None, Duration::from_secs(1)).await.unwrap();

        let start = Instant::now();
        limiter.admit(None, Duration::from_secs(120)).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(60));
        assert!(waited <= Duration::from_millis(60_500));
    }

    #[tokio::test]
    async fn test_admit_times_out() {
        tokio::time::pause();
        let limiter = limiter(1, 10);
        limiter.admit(Some("alice"), Duration::from_secs(1)).await.unwrap();

        let err = limiter
            .admit(Some("alice"), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err.caller, "alice");
        assert!(err.waited >= Duration::from_secs(10));
        assert!(err.to_string().contains("rate limit exceeded"));
    }

    #[tokio::test]
    async fn test_admit_zero_timeout_tries_once() {
        tokio::time::pause();
        let limiter = limiter(1, 10);
        assert!(limiter.admit(None, Duration::ZERO).await.is_ok());
        assert!(limiter.admit(None, Duration::ZERO).await.is_err());
    }

    #[tokio::test]
    async fn test_admit_within_budget_all_succeed() {
        tokio::time::pause();
        // capacity 5, refill 1 token / 12s
        let limiter = limiter(5, 100);
        for _ in 0..5 {
            limiter.admit(None, Duration::ZERO).await.unwrap();
        }
        // Requests spaced at the refill rate never exceed capacity + rate * T
        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(12)).await;
            limiter.admit(None, Duration::from_secs(1)).await.unwrap();
        }
    }

    // ==================== remaining / sweep Tests ====================

    #[tokio::test]
    async fn test_remaining_reports_whole_tokens() {
        tokio::time::pause();
        let limiter = limiter(30, 10);
        assert_eq!(limiter.remaining("alice").await, 10);
        limiter.try_acquire(Some("alice")).await;
        limiter.try_acquire(Some("alice")).await;
        assert_eq!(limiter.remaining("alice").await, 8);
    }

    #[tokio::test]
    async fn test_sweep_drops_only_full_buckets() {
        tokio::time::pause();
        let config = BucketConfig::per_period(2, Duration::from_secs(60));
        let now = Instant::now();
        let mut callers = HashMap::new();
        callers.insert("idle".to_string(), TokenBucket::full(config));
        let mut busy = TokenBucket::full(config);
        assert!(busy.try_take(now));
        callers.insert("busy".to_string(), busy);

        sweep_full_buckets(&mut callers, now);

        assert!(!callers.contains_key("idle"));
        assert!(callers.contains_key("busy"));
    }

    #[tokio::test]
    async fn test_tracked_callers_created_lazily() {
        let limiter = limiter(30, 10);
        assert_eq!(limiter.tracked_callers().await, 0);
        limiter.try_acquire(None).await;
        assert_eq!(limiter.tracked_callers().await, 0);
        limiter.try_acquire(Some("alice")).await;
        assert_eq!(limiter.tracked_callers().await, 1);
    }
}
