//! Shared User-Agent strings and default request headers.
//!
//! Share-service requests present as a mainstream browser, with the
//! User-Agent rotated per request unless an identity pins one. Maintenance
//! traffic (proxy feeds, health probes) identifies the tool instead.

use rand::seq::SliceRandom;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use tracing::debug;

/// Browser User-Agents rotated across outbound share-service requests.
pub const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
];

/// Picks a browser User-Agent at random.
#[must_use]
pub fn random_browser_user_agent() -> &'static str {
    BROWSER_USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(BROWSER_USER_AGENTS[0])
}

/// User-Agent for proxy feeds and health probes (identifies the tool).
#[must_use]
pub fn maintenance_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("sharelink/{version} (pool-maintenance)")
}

/// Builds the browser-like header set sent with every executor request.
#[must_use]
pub fn browser_headers(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/html;q=0.9, */*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    insert_header(&mut headers, USER_AGENT.as_str(), user_agent);
    headers
}

/// Inserts a header, skipping (and logging) names or values that are not valid HTTP.
pub fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => debug!(header = name, "skipping invalid header"),
    }
}
