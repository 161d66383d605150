//! Shared HTTP client construction policy.
//!
//! Centralizes timeouts, compression and proxy routing so every outbound
//! request (executor calls, proxy probes, feed fetches) is built the same way.
//! Proxied clients are cached per proxy address because reqwest binds proxies
//! at client construction.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use dashmap::DashMap;
use reqwest::{Client, ClientBuilder, Proxy};
use tracing::{debug, warn};

use super::error::RequestError;

/// Default HTTP connect timeout (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default HTTP read timeout (30 seconds).
pub const READ_TIMEOUT_SECS: u64 = 30;

/// Connect and total-read timeouts applied to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// Connection establishment timeout.
    pub connect: Duration,
    /// Whole-request timeout, including reading the body.
    pub read: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read: Duration::from_secs(READ_TIMEOUT_SECS),
        }
    }
}

impl HttpTimeouts {
    /// Uses `timeout` for both connect and read.
    #[must_use]
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            connect: timeout,
            read: timeout,
        }
    }
}

/// Builds a client routed directly (`proxy_url == None`) or through a proxy.
///
/// Proxy URLs may use `http://`, `https://` or `socks5://`.
///
/// # Errors
///
/// Returns [`RequestError::ClientBuild`] when the proxy URL is malformed or the
/// TLS backend cannot be initialized.
pub fn build_client(proxy_url: Option<&str>, timeouts: HttpTimeouts) -> Result<Client, RequestError> {
    let route = proxy_url.unwrap_or("direct");

    // Some sandboxed environments panic while querying system proxy settings.
    catch_unwind(AssertUnwindSafe(|| {
        let mut builder = base_builder(timeouts);
        if let Some(proxy_url) = proxy_url {
            let proxy = Proxy::all(proxy_url)
                .map_err(|error| RequestError::client_build(route, error.to_string()))?;
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map_err(|error| RequestError::client_build(route, error.to_string()))
    }))
    .map_err(|_| RequestError::client_build(route, "HTTP client construction panicked"))?
}

fn base_builder(timeouts: HttpTimeouts) -> ClientBuilder {
    Client::builder()
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.read)
        .gzip(true)
}

/// Lazily built clients, one per route.
#[derive(Debug)]
pub struct ClientCache {
    timeouts: HttpTimeouts,
    direct: Client,
    proxied: DashMap<String, Client>,
}

impl ClientCache {
    /// Creates a cache and eagerly builds the direct client.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::ClientBuild`] if the direct client cannot be built.
    pub fn new(timeouts: HttpTimeouts) -> Result<Self, RequestError> {
        Ok(Self {
            timeouts,
            direct: build_client(None, timeouts)?,
            proxied: DashMap::new(),
        })
    }

    /// Returns the timeouts every cached client was built with.
    #[must_use]
    pub fn timeouts(&self) -> HttpTimeouts {
        self.timeouts
    }

    /// Returns the direct (unproxied) client.
    #[must_use]
    pub fn direct(&self) -> &Client {
        &self.direct
    }

    /// Returns the client for `proxy_url`, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::ClientBuild`] for malformed proxy addresses.
    pub fn for_proxy(&self, proxy_url: &str) -> Result<Client, RequestError> {
        if let Some(client) = self.proxied.get(proxy_url) {
            return Ok(client.clone());
        }

        let client = build_client(Some(proxy_url), self.timeouts).inspect_err(|error| {
            warn!(proxy = proxy_url, error = %error, "cannot build proxied client");
        })?;
        debug!(proxy = proxy_url, "built proxied client");
        self.proxied.insert(proxy_url.to_string(), client.clone());
        Ok(client)
    }

    /// Number of proxied clients built so far.
    #[must_use]
    pub fn proxied_count(&self) -> usize {
        self.proxied.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = HttpTimeouts::default();
        assert_eq!(timeouts.connect, Duration::from_secs(10));
        assert_eq!(timeouts.read, Duration::from_secs(30));
    }

    #[test]
    fn test_build_client_direct_and_proxied() {
        assert!(build_client(None, HttpTimeouts::default()).is_ok());
        assert!(build_client(Some("http://127.0.0.1:8080"), HttpTimeouts::default()).is_ok());
        assert!(build_client(Some("socks5://127.0.0.1:1080"), HttpTimeouts::default()).is_ok());
    }

    #[test]
    fn test_build_client_rejects_malformed_proxy() {
        let err = build_client(Some("::not a proxy::"), HttpTimeouts::default()).unwrap_err();
        assert!(matches!(err, RequestError::ClientBuild { .. }));
        assert!(err.to_string().contains("::not a proxy::"));
    }

    #[test]
    fn test_client_cache_reuses_proxied_clients() {
        let cache = ClientCache::new(HttpTimeouts::uniform(Duration::from_secs(5))).unwrap();
        assert_eq!(cache.proxied_count(), 0);
        cache.for_proxy("http://127.0.0.1:3128").unwrap();
        cache.for_proxy("http://127.0.0.1:3128").unwrap();
        cache.for_proxy("http://127.0.0.1:3129").unwrap();
        assert_eq!(cache.proxied_count(), 2);
        assert_eq!(cache.timeouts().read, Duration::from_secs(5));
    }
}
