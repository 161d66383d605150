//! Sharelink Core Library
//!
//! Resilient direct-link extraction for file-sharing links. A submitted share
//! link is validated, admitted by a rate limiter, answered from a result cache
//! when possible, and otherwise handed to prioritized extraction strategies
//! whose HTTP traffic flows through a single retrying executor backed by
//! rotating proxies and client identities.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`network`] - rate limiting, retry policy, HTTP clients and the request executor
//! - [`pool`] - proxy pool with health scoring, identity pool
//! - [`cache`] - TTL + LRU result cache
//! - [`extractor`] - share-link validation, the strategy trait and the orchestrator
//! - [`strategies`] - built-in strategies (share API, page scrape, relay, bypass)
//! - [`config`] - settings from the environment

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

pub mod cache;
pub mod config;
pub mod extractor;
pub mod network;
pub mod pool;
pub mod strategies;

// Re-export commonly used types
pub use cache::{CacheStats, ResultCache};
pub use config::{ConfigError, Settings};
pub use extractor::{
    ErrorKind, ExtractError, Extraction, ExtractionOrchestrator, ExtractionOutcome,
    FileDescriptor, OrchestratorConfig, OrchestratorStats, ShareTarget, Strategy, TargetMatcher,
};
pub use network::{
    RateLimiter, RequestError, RequestExecutor, RequestSpec, RetryPolicy,
};
pub use pool::{IdentityPool, ProxyPool, ProxyPoolConfig};

/// Wires the full pipeline from `settings` and loads the proxy pool.
///
/// Proxy feeds are fetched and probed before this returns, so startup takes up
/// to the probe timeout when proxies are enabled.
///
/// # Errors
///
/// Returns [`RequestError::ClientBuild`] if the HTTP client cannot be built.
pub async fn build_orchestrator(settings: &Settings) -> Result<ExtractionOrchestrator, RequestError> {
    let proxies = Arc::new(ProxyPool::new(settings.proxy_pool_config()));
    proxies.initialize().await;

    let executor = RequestExecutor::new(
        proxies,
        Arc::new(IdentityPool::new(settings.identity_pool_size)),
        settings.retry_policy(),
        settings.http_timeouts(),
    )?;

    let cache = if settings.cache_enabled {
        ResultCache::new(
            settings.cache_max_size,
            Duration::from_secs(settings.cache_ttl_secs),
        )
    } else {
        ResultCache::disabled()
    };

    let mut orchestrator = ExtractionOrchestrator::new(
        settings.target_matcher(),
        Arc::new(settings.rate_limiter()),
        Arc::new(cache),
        Arc::new(executor),
        settings.orchestrator_config(),
    );
    for strategy in strategies::default_strategies(settings) {
        orchestrator.register(strategy);
    }

    info!(
        strategies = ?orchestrator.strategy_names(),
        proxies = settings.use_proxy,
        cache = settings.cache_enabled,
        "extraction pipeline ready"
    );
    Ok(orchestrator)
}
