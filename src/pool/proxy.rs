//! Scored, health-checked pool of outbound proxy endpoints.
//!
//! Endpoints come from a static list plus best-effort proxy-list feeds. A
//! bounded subset is probed at startup; endpoints that fail the probe are kept
//! but marked dead so [`ProxyPool::reprobe`] can test them again later.
//!
//! Selection favors high-scoring endpoints without always picking the best
//! one: the top quartile (at least [`MIN_CANDIDATES`]) is sampled uniformly,
//! skipping endpoints used for the same destination within
//! [`DESTINATION_COOLDOWN`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use indexmap::IndexMap;
use rand::seq::SliceRandom;
use reqwest::header::USER_AGENT;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::source::{fetch_all_sources, normalize_proxy_address};
use crate::network::client::{HttpTimeouts, build_client};
use crate::network::headers::maintenance_user_agent;

/// Window during which an endpoint is not reused for the same destination.
pub const DESTINATION_COOLDOWN: Duration = Duration::from_secs(5);

/// Failure count an endpoint must exceed before it can be marked dead.
pub const DEATH_FAILURE_THRESHOLD: u32 = 5;

/// Score below which a repeatedly failing endpoint is marked dead.
pub const DEATH_SCORE_THRESHOLD: f64 = 0.3;

/// Minimum size of the candidate set sampled by [`ProxyPool::select`].
pub const MIN_CANDIDATES: usize = 5;

/// Score of an endpoint with no recorded attempts.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Latency at which the speed component of the score reaches zero.
const SLOW_LATENCY_SECS: f64 = 10.0;

/// Default health-probe target.
pub const DEFAULT_PROBE_URL: &str = "https://www.google.com";

/// Default number of endpoints probed at startup.
pub const DEFAULT_PROBE_LIMIT: usize = 50;

/// Default health-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for fetching proxy-list feeds.
const FEED_TIMEOUT: Duration = Duration::from_secs(15);

/// Public proxy-list feeds used when none are configured.
pub const DEFAULT_PROXY_SOURCES: [&str; 3] = [
    "https://api.proxyscrape.com/v2/?request=displayproxies&protocol=http&timeout=10000&country=all&ssl=all&anonymity=all",
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
    "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/http.txt",
];

/// Protocol spoken to a proxy endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    /// Plain HTTP proxy (CONNECT for TLS destinations).
    Http,
    /// HTTP proxy reached over TLS.
    Https,
    /// SOCKS5 proxy.
    Socks5,
}

impl ProxyProtocol {
    fn from_address(address: &str) -> Option<Self> {
        match address.split_once("://")?.0 {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "socks5" => Some(Self::Socks5),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks5 => "socks5",
        };
        f.write_str(name)
    }
}

/// Scores an endpoint from its counters.
///
/// Zero attempts scores exactly [`NEUTRAL_SCORE`]. Otherwise
/// `0.7 * success_rate + 0.3 * max(0, 1 - latency_secs / 10)`.
#[must_use]
pub fn proxy_score(successes: u32, failures: u32, avg_latency: Duration) -> f64 {
    let attempts = successes + failures;
    if attempts == 0 {
        return NEUTRAL_SCORE;
    }
    let success_rate = f64::from(successes) / f64::from(attempts);
    let speed = (1.0 - avg_latency.as_secs_f64() / SLOW_LATENCY_SECS).max(0.0);
    0.7 * success_rate + 0.3 * speed
}

/// One outbound proxy and its observed health.
#[derive(Debug, Clone)]
pub struct ProxyEndpoint {
    address: String,
    protocol: ProxyProtocol,
    successes: u32,
    failures: u32,
    avg_latency: Duration,
    alive: bool,
    last_used: Option<Instant>,
    cooldowns: HashMap<String, Instant>,
}

impl ProxyEndpoint {
    /// Parses a proxy address (`host:port` or `scheme://host:port`).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let address = normalize_proxy_address(raw)?;
        let protocol = ProxyProtocol::from_address(&address)?;
        Some(Self {
            address,
            protocol,
            successes: 0,
            failures: 0,
            avg_latency: Duration::ZERO,
            alive: true,
            last_used: None,
            cooldowns: HashMap::new(),
        })
    }

    /// Normalized `scheme://host:port` address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn protocol(&self) -> ProxyProtocol {
        self.protocol
    }

    #[must_use]
    pub fn successes(&self) -> u32 {
        self.successes
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Smoothed response latency.
    #[must_use]
    pub fn avg_latency(&self) -> Duration {
        self.avg_latency
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    #[must_use]
    pub fn last_used(&self) -> Option<Instant> {
        self.last_used
    }

    /// Current score, recomputed from the counters on every call.
    #[must_use]
    pub fn score(&self) -> f64 {
        proxy_score(self.successes, self.failures, self.avg_latency)
    }

    fn in_cooldown(&self, destination: &str, now: Instant, window: Duration) -> bool {
        self.cooldowns
            .get(destination)
            .is_some_and(|used| now.saturating_duration_since(*used) < window)
    }

    fn mark_used(&mut self, destination: &str, now: Instant, window: Duration) {
        self.last_used = Some(now);
        if destination.is_empty() {
            return;
        }
        self.cooldowns
            .retain(|_, used| now.saturating_duration_since(*used) < window);
        self.cooldowns.insert(destination.to_string(), now);
    }

    fn record_success(&mut self, latency: Duration) {
        self.successes = self.successes.saturating_add(1);
        self.avg_latency = (self.avg_latency + latency) / 2;
    }

    /// Returns `true` when this failure killed the endpoint.
    fn record_failure(&mut self, death_failures: u32, death_score: f64) -> bool {
        self.failures = self.failures.saturating_add(1);
        if self.alive && self.failures > death_failures && self.score() < death_score {
            self.alive = false;
            return true;
        }
        false
    }
}

/// Proxy pool tuning.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// When `false` the pool never selects an endpoint.
    pub enabled: bool,
    /// Endpoints always present in the pool.
    pub static_proxies: Vec<String>,
    /// Proxy-list feed URLs fetched at initialization.
    pub sources: Vec<String>,
    /// Known-good URL used for health probes.
    pub probe_url: String,
    /// Maximum endpoints probed per probe round.
    pub probe_limit: usize,
    /// Per-probe timeout.
    pub probe_timeout: Duration,
    /// Per-destination reuse window.
    pub cooldown: Duration,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            static_proxies: Vec::new(),
            sources: DEFAULT_PROXY_SOURCES.iter().map(ToString::to_string).collect(),
            probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_limit: DEFAULT_PROBE_LIMIT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            cooldown: DESTINATION_COOLDOWN,
        }
    }
}

/// Read-only pool snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProxyStats {
    pub total: usize,
    pub alive: usize,
    pub dead: usize,
}

/// Shared proxy pool. Wrap in `Arc` and share across tasks.
///
/// Every mutation happens under one pool-wide lock.
#[derive(Debug)]
pub struct ProxyPool {
    config: ProxyPoolConfig,
    endpoints: Mutex<IndexMap<String, ProxyEndpoint>>,
    initialized: AtomicBool,
}

impl ProxyPool {
    /// Creates an empty pool. Call [`initialize`](Self::initialize) to load it.
    #[must_use]
    pub fn new(config: ProxyPoolConfig) -> Self {
        Self {
            config,
            endpoints: Mutex::new(IndexMap::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// A pool that never selects an endpoint.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(ProxyPoolConfig {
            enabled: false,
            sources: Vec::new(),
            ..ProxyPoolConfig::default()
        })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    #[must_use]
    pub fn config(&self) -> &ProxyPoolConfig {
        &self.config
    }

    /// Adds endpoints, skipping malformed and duplicate addresses.
    ///
    /// Returns how many endpoints were added.
    pub async fn add_endpoints<I, S>(&self, addresses: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut endpoints = self.endpoints.lock().await;
        let mut added = 0;
        for raw in addresses {
            match ProxyEndpoint::parse(raw.as_ref()) {
                Some(endpoint) if !endpoints.contains_key(endpoint.address()) => {
                    endpoints.insert(endpoint.address().to_string(), endpoint);
                    added += 1;
                }
                Some(_) => {}
                None => debug!(address = raw.as_ref(), "ignoring malformed proxy address"),
            }
        }
        added
    }

    /// Loads the static list and feeds, then probes the first `probe_limit`
    /// endpoints. Runs once; later calls return immediately.
    #[instrument(skip(self))]
    pub async fn initialize(&self) {
        if !self.config.enabled || self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }

        self.add_endpoints(&self.config.static_proxies).await;

        if !self.config.sources.is_empty() {
            match build_client(None, HttpTimeouts::uniform(FEED_TIMEOUT)) {
                Ok(client) => {
                    let fetched = fetch_all_sources(&client, &self.config.sources).await;
                    let added = self.add_endpoints(fetched).await;
                    debug!(added, "merged proxy feeds");
                }
                Err(error) => warn!(error = %error, "skipping proxy feeds"),
            }
        }

        let addresses: Vec<String> = {
            let endpoints = self.endpoints.lock().await;
            endpoints.keys().take(self.config.probe_limit).cloned().collect()
        };
        let alive = self.probe(addresses).await;

        let stats = self.stats().await;
        info!(
            total = stats.total,
            alive = stats.alive,
            probed_alive = alive,
            "proxy pool initialized"
        );
    }

    /// Re-tests up to `probe_limit` dead endpoints, reviving those that answer.
    ///
    /// Returns how many endpoints came back.
    #[instrument(skip(self))]
    pub async fn reprobe(&self) -> usize {
        if !self.config.enabled {
            return 0;
        }
        let dead: Vec<String> = {
            let endpoints = self.endpoints.lock().await;
            endpoints
                .values()
                .filter(|endpoint| !endpoint.alive)
                .map(|endpoint| endpoint.address.clone())
                .take(self.config.probe_limit)
                .collect()
        };
        if dead.is_empty() {
            return 0;
        }
        let revived = self.probe(dead).await;
        info!(revived, "re-probed dead proxies");
        revived
    }

    /// Probes `addresses` concurrently and records the results.
    async fn probe(&self, addresses: Vec<String>) -> usize {
        if addresses.is_empty() {
            return 0;
        }
        let results = join_all(
            addresses
                .iter()
                .map(|address| probe_endpoint(address, &self.config.probe_url, self.config.probe_timeout)),
        )
        .await;

        let mut endpoints = self.endpoints.lock().await;
        let mut alive = 0;
        for (address, result) in addresses.iter().zip(results) {
            let Some(endpoint) = endpoints.get_mut(address) else {
                continue;
            };
            match result {
                Some(latency) => {
                    endpoint.alive = true;
                    endpoint.successes = endpoint.successes.saturating_add(1);
                    endpoint.avg_latency = latency;
                    alive += 1;
                }
                None => {
                    endpoint.alive = false;
                    endpoint.failures = endpoint.failures.saturating_add(1);
                }
            }
        }
        alive
    }

    /// Picks an endpoint for a request to `destination` (a host name).
    ///
    /// Returns `None` when the pool is disabled or empty. If every endpoint is
    /// dead, all are revived first. An empty `destination` skips cooldowns.
    pub async fn select(&self, destination: &str) -> Option<String> {
        if !self.config.enabled {
            return None;
        }

        let mut endpoints = self.endpoints.lock().await;
        if endpoints.is_empty() {
            return None;
        }

        if !endpoints.values().any(ProxyEndpoint::is_alive) {
            warn!(count = endpoints.len(), "all proxies dead, reviving pool");
            for endpoint in endpoints.values_mut() {
                endpoint.alive = true;
            }
        }

        let now = Instant::now();
        let window = self.config.cooldown;
        let alive: Vec<(usize, f64)> = endpoints
            .values()
            .enumerate()
            .filter(|(_, endpoint)| endpoint.alive)
            .map(|(index, endpoint)| (index, endpoint.score()))
            .collect();

        let mut candidates: Vec<(usize, f64)> = if destination.is_empty() {
            alive
        } else {
            let rested: Vec<(usize, f64)> = alive
                .iter()
                .copied()
                .filter(|(index, _)| {
                    endpoints
                        .get_index(*index)
                        .is_some_and(|(_, endpoint)| !endpoint.in_cooldown(destination, now, window))
                })
                .collect();
            if rested.is_empty() {
                debug!(destination, "every proxy cooling down, ignoring cooldown");
                alive
            } else {
                rested
            }
        };

        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        let top = MIN_CANDIDATES.max(candidates.len() / 4).min(candidates.len());
        let (index, score) = pick_uniform(&candidates[..top])?;

        let (_, endpoint) = endpoints.get_index_mut(index)?;
        endpoint.mark_used(destination, now, window);
        debug!(proxy = %endpoint.address, score, destination, "selected proxy");
        Some(endpoint.address.clone())
    }

    /// Records a successful request through `address`.
    pub async fn report_success(&self, address: &str, latency: Duration) {
        let mut endpoints = self.endpoints.lock().await;
        match endpoints.get_mut(address) {
            Some(endpoint) => endpoint.record_success(latency),
            None => debug!(proxy = address, "success reported for unknown proxy"),
        }
    }

    /// Records a failed request through `address`.
    ///
    /// The endpoint dies only once its failures exceed
    /// [`DEATH_FAILURE_THRESHOLD`] and its score is below
    /// [`DEATH_SCORE_THRESHOLD`].
    pub async fn report_failure(&self, address: &str) {
        let mut endpoints = self.endpoints.lock().await;
        match endpoints.get_mut(address) {
            Some(endpoint) => {
                if endpoint.record_failure(DEATH_FAILURE_THRESHOLD, DEATH_SCORE_THRESHOLD) {
                    warn!(
                        proxy = address,
                        failures = endpoint.failures,
                        score = endpoint.score(),
                        "proxy marked dead"
                    );
                }
            }
            None => debug!(proxy = address, "failure reported for unknown proxy"),
        }
    }

    pub async fn stats(&self) -> ProxyStats {
        let endpoints = self.endpoints.lock().await;
        let alive = endpoints.values().filter(|endpoint| endpoint.alive).count();
        ProxyStats {
            total: endpoints.len(),
            alive,
            dead: endpoints.len() - alive,
        }
    }

    /// Copies of every endpoint, in insertion order.
    pub async fn snapshot(&self) -> Vec<ProxyEndpoint> {
        self.endpoints.lock().await.values().cloned().collect()
    }
}

fn pick_uniform<T: Copy>(items: &[T]) -> Option<T> {
    items.choose(&mut rand::thread_rng()).copied()
}

/// Sends one GET through `address`; returns the latency on a 2xx answer.
async fn probe_endpoint(address: &str, probe_url: &str, timeout: Duration) -> Option<Duration> {
    let client = build_client(Some(address), HttpTimeouts::uniform(timeout)).ok()?;
    let started = Instant::now();
    match client
        .get(probe_url)
        .header(USER_AGENT, maintenance_user_agent())
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => Some(started.elapsed()),
        Ok(response) => {
            debug!(proxy = address, status = response.status().as_u16(), "probe rejected");
            None
        }
        Err(error) => {
            debug!(proxy = address, error = %error, "probe failed");
            None
        }
    }
}
