//! Top-level extraction entry point.
//!
//! `extract` walks `Validating -> RateLimiting -> CacheCheck -> StrategyLoop`:
//! invalid input and refused admission end the request immediately, a cache
//! hit skips every strategy, and the loop stops at the first strategy that
//! returns files. Strategy failures and panics only move the loop along.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::error::ExtractError;
use super::target::{ShareTarget, TargetMatcher};
use super::{ExtractionOutcome, FileDescriptor, Strategy};
use crate::cache::{CacheStats, ResultCache};
use crate::network::{RateLimiter, RequestExecutor};
use crate::pool::{IdentityStats, ProxyStats};

/// Default wait for rate-limit admission.
pub const DEFAULT_ADMISSION_TIMEOUT: Duration = Duration::from_secs(10);

/// A successful extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub files: Vec<FileDescriptor>,
    /// Strategy that produced the files.
    pub strategy: String,
    /// Served from the result cache.
    pub from_cache: bool,
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long `extract` waits for rate-limit admission.
    pub admission_timeout: Duration,
    /// TTL of cached extractions.
    pub cache_ttl: Duration,
    /// Upper bound on the whole strategy loop. `None` means unbounded.
    pub deadline: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            admission_timeout: DEFAULT_ADMISSION_TIMEOUT,
            cache_ttl: crate::cache::DEFAULT_CACHE_TTL,
            deadline: None,
        }
    }
}

/// Read-only snapshot across the pipeline's shared services.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub cache: CacheStats,
    pub proxies: ProxyStats,
    pub identities: IdentityStats,
    /// Registered strategies in the order they are tried.
    pub strategies: Vec<String>,
}

/// Runs prioritized strategies behind admission control and a result cache.
///
/// Share one instance behind `Arc`; `extract` may run concurrently.
pub struct ExtractionOrchestrator {
    matcher: TargetMatcher,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResultCache<Extraction>>,
    executor: Arc<RequestExecutor>,
    strategies: Vec<Box<dyn Strategy>>,
    config: OrchestratorConfig,
}

impl ExtractionOrchestrator {
    /// Creates an orchestrator with no strategies registered.
    #[must_use]
    pub fn new(
        matcher: TargetMatcher,
        limiter: Arc<RateLimiter>,
        cache: Arc<ResultCache<Extraction>>,
        executor: Arc<RequestExecutor>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            matcher,
            limiter,
            cache,
            executor,
            strategies: Vec::new(),
            config,
        }
    }

    /// Registers a strategy, keeping the list sorted by priority.
    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        debug!(
            name = strategy.name(),
            priority = strategy.priority(),
            "registering strategy"
        );
        self.strategies.push(strategy);
        // Stable sort: equal priorities keep registration order.
        self.strategies.sort_by_key(|strategy| strategy.priority());
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with_strategy(mut self, strategy: Box<dyn Strategy>) -> Self {
        self.register(strategy);
        self
    }

    /// Names of registered strategies in the order they run.
    #[must_use]
    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies
            .iter()
            .map(|strategy| strategy.name().to_string())
            .collect()
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    /// Extracts the files behind `url` on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// - [`ExtractError::InvalidInput`] if `url` is not a recognized share link
    /// - [`ExtractError::RateLimited`] if admission times out
    /// - [`ExtractError::DeadlineExceeded`] if the configured deadline elapses
    /// - [`ExtractError::StrategyExhausted`] if no strategy produced files
    #[instrument(skip(self, caller), fields(caller = caller.unwrap_or("anonymous")))]
    pub async fn extract(&self, url: &str, caller: Option<&str>) -> Result<Extraction, ExtractError> {
        let target = self.matcher.parse(url)?;

        self.limiter
            .admit(caller, self.config.admission_timeout)
            .await?;

        if let Some(cached) = self.cache.get(target.cache_key()).await {
            info!(strategy = %cached.strategy, "cache hit");
            return Ok(Extraction {
                from_cache: true,
                ..cached
            });
        }

        let extraction = self.run_strategies(&target).await?;
        self.cache
            .set(
                target.cache_key(),
                extraction.clone(),
                Some(self.config.cache_ttl),
            )
            .await;
        Ok(extraction)
    }

    async fn run_strategies(&self, target: &ShareTarget) -> Result<Extraction, ExtractError> {
        let started = Instant::now();
        let mut last_error: Option<String> = None;
        let mut tried = 0;

        for strategy in &self.strategies {
            let remaining = match self.config.deadline {
                Some(deadline) => match deadline.checked_sub(started.elapsed()) {
                    Some(remaining) if !remaining.is_zero() => Some(remaining),
                    _ => return Err(self.deadline_error(target, deadline, tried)),
                },
                None => None,
            };

            tried += 1;
            debug!(strategy = strategy.name(), "trying strategy");
            let attempt = AssertUnwindSafe(strategy.attempt(target, &self.executor)).catch_unwind();
            let result = match remaining {
                Some(remaining) => match tokio::time::timeout(remaining, attempt).await {
                    Ok(result) => result,
                    Err(_) => {
                        let deadline = self.config.deadline.unwrap_or(remaining);
                        return Err(self.deadline_error(target, deadline, tried));
                    }
                },
                None => attempt.await,
            };

            match result {
                Ok(ExtractionOutcome::Success { files, strategy: name }) if !files.is_empty() => {
                    info!(
                        strategy = %name,
                        files = files.len(),
                        elapsed_ms = started.elapsed().as_millis(),
                        "extraction succeeded"
                    );
                    return Ok(Extraction {
                        files,
                        strategy: name,
                        from_cache: false,
                    });
                }
                Ok(ExtractionOutcome::Success { .. }) => {
                    debug!(strategy = strategy.name(), "strategy returned no files");
                    last_error = Some(format!("{}: no files found", strategy.name()));
                }
                Ok(ExtractionOutcome::Failure { reason }) => {
                    debug!(strategy = strategy.name(), reason = %reason, "strategy failed, trying next");
                    last_error = Some(format!("{}: {reason}", strategy.name()));
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(strategy = strategy.name(), panic = %message, "strategy panicked, trying next");
                    last_error = Some(format!("{} panicked: {message}", strategy.name()));
                }
            }
        }

        warn!(tried, last_error = ?last_error, "all strategies failed");
        Err(ExtractError::strategy_exhausted(target.url(), tried, last_error))
    }

    fn deadline_error(&self, target: &ShareTarget, deadline: Duration, tried: usize) -> ExtractError {
        warn!(
            deadline_ms = deadline.as_millis(),
            tried,
            strategies = self.strategies.len(),
            "extraction deadline exceeded"
        );
        ExtractError::deadline_exceeded(target.url(), deadline, tried)
    }

    /// Snapshot of cache, proxy and identity statistics.
    pub async fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            cache: self.cache.stats().await,
            proxies: self.executor.proxies().stats().await,
            identities: self.executor.identities().stats().await,
            strategies: self.strategy_names(),
        }
    }
}

impl std::fmt::Debug for ExtractionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionOrchestrator")
            .field("strategies", &self.strategy_names())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
