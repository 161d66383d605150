//! Shared pools of outbound routes and client identities.
//!
//! Both pools are long-lived service objects built once at startup and shared
//! through `Arc`. Each guards its entries with a single lock, so selection and
//! feedback are safe from many concurrent requests.

mod identity;
mod proxy;
mod source;

pub use identity::{
    DEFAULT_IDENTITY_POOL_SIZE, IDENTITY_FAILURE_THRESHOLD, IdentityPool, IdentityStats,
    IssuedIdentity, generate_cookie,
};
pub use proxy::{
    DEATH_FAILURE_THRESHOLD, DEATH_SCORE_THRESHOLD, DEFAULT_PROBE_LIMIT, DEFAULT_PROBE_TIMEOUT,
    DEFAULT_PROBE_URL, DEFAULT_PROXY_SOURCES, DESTINATION_COOLDOWN, MIN_CANDIDATES, NEUTRAL_SCORE,
    ProxyEndpoint, ProxyPool, ProxyPoolConfig, ProxyProtocol, ProxyStats, proxy_score,
};
pub use source::{
    SUPPORTED_PROXY_SCHEMES, SourceError, fetch_all_sources, fetch_proxy_list,
    normalize_proxy_address, parse_proxy_list,
};
