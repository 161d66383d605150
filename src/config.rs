//! Runtime settings loaded from the environment.
//!
//! Every key has a default; a `.env` file in the working directory is read
//! first and real environment variables take precedence over it. Empty values
//! count as unset. List values are separated by commas or whitespace.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::extractor::{DEFAULT_SHARE_DOMAINS, OrchestratorConfig, TargetMatcher};
use crate::network::{BucketConfig, DEFAULT_MAX_RETRIES, HttpTimeouts, RateLimiter, RetryPolicy};
use crate::pool::{
    DEFAULT_IDENTITY_POOL_SIZE, DEFAULT_PROBE_LIMIT, DEFAULT_PROBE_URL, DEFAULT_PROXY_SOURCES,
    DESTINATION_COOLDOWN, ProxyPoolConfig,
};
use crate::strategies::{DEFAULT_API_BASES, DEFAULT_PAGE_BASES, DEFAULT_RELAY_ENDPOINTS};

/// Errors raised while loading or validating [`Settings`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A key holds a value that does not parse or is out of range.
    #[error("Invalid value for `{key}`: '{value}'. Expected {expected}\n  Suggestion: Fix or unset {key} in the environment or .env file")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: String,
    },

    /// The `.env` file exists but could not be read.
    #[error("Could not read env file {path}: {source}\n  Suggestion: Check the file's syntax (KEY=value per line)")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: impl ToString, expected: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            value: value.to_string(),
            expected: expected.into(),
        }
    }
}

/// All tunables of the extraction pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// `USE_PROXY`
    pub use_proxy: bool,
    /// `PROXY_SOURCES`
    pub proxy_sources: Vec<String>,
    /// `CUSTOM_PROXIES`
    pub custom_proxies: Vec<String>,
    /// `PROXY_PROBE_URL`
    pub proxy_probe_url: String,
    /// `PROXY_PROBE_LIMIT`
    pub proxy_probe_limit: usize,
    /// `PROXY_PROBE_TIMEOUT_SECS`
    pub proxy_probe_timeout_secs: u64,
    /// `IDENTITY_POOL_SIZE`
    pub identity_pool_size: usize,
    /// `RATE_LIMIT_REQUESTS`
    pub rate_limit_requests: u32,
    /// `RATE_LIMIT_PERIOD`, seconds.
    pub rate_limit_period_secs: u64,
    /// `USER_RATE_LIMIT`, per caller over the same period.
    pub user_rate_limit: u32,
    /// `ADMISSION_TIMEOUT_SECS`
    pub admission_timeout_secs: u64,
    /// `CACHE_ENABLED`
    pub cache_enabled: bool,
    /// `CACHE_TTL`, seconds.
    pub cache_ttl_secs: u64,
    /// `CACHE_MAX_SIZE`
    pub cache_max_size: usize,
    /// `MAX_RETRIES`
    pub max_retries: u32,
    /// `RETRY_DELAY_MS`
    pub retry_delay_ms: u64,
    /// `CONNECT_TIMEOUT`, seconds.
    pub connect_timeout_secs: u64,
    /// `READ_TIMEOUT`, seconds.
    pub read_timeout_secs: u64,
    /// `EXTRACTION_DEADLINE_SECS`
    pub extraction_deadline_secs: Option<u64>,
    /// `SHARE_DOMAINS`
    pub share_domains: Vec<String>,
    /// `API_BASES`
    pub api_bases: Vec<String>,
    /// `PAGE_BASES`
    pub page_bases: Vec<String>,
    /// `RELAY_ENDPOINTS`
    pub relay_endpoints: Vec<String>,
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_proxy: true,
            proxy_sources: owned(&DEFAULT_PROXY_SOURCES),
            custom_proxies: Vec::new(),
            proxy_probe_url: DEFAULT_PROBE_URL.to_string(),
            proxy_probe_limit: DEFAULT_PROBE_LIMIT,
            proxy_probe_timeout_secs: 10,
            identity_pool_size: DEFAULT_IDENTITY_POOL_SIZE,
            rate_limit_requests: 30,
            rate_limit_period_secs: 60,
            user_rate_limit: 10,
            admission_timeout_secs: 10,
            cache_enabled: true,
            cache_ttl_secs: 3600,
            cache_max_size: 10_000,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: 2000,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            extraction_deadline_secs: None,
            share_domains: owned(DEFAULT_SHARE_DOMAINS),
            api_bases: owned(&DEFAULT_API_BASES),
            page_bases: owned(&DEFAULT_PAGE_BASES),
            relay_endpoints: owned(&DEFAULT_RELAY_ENDPOINTS),
        }
    }
}

impl Settings {
    /// Loads `.env` (if present) and then the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a value is malformed or out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "loaded .env file"),
            Err(error) if error.not_found() => {}
            Err(source) => {
                return Err(ConfigError::EnvFile {
                    path: PathBuf::from(".env"),
                    source,
                });
            }
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads settings from a specific env file; process variables still win.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be parsed or a value is
    /// invalid.
    pub fn from_env_file(path: &Path) -> Result<Self, ConfigError> {
        let to_error = |source| ConfigError::EnvFile {
            path: path.to_path_buf(),
            source,
        };
        let mut file_values = HashMap::new();
        for item in dotenvy::from_path_iter(path).map_err(to_error)? {
            let (key, value) = item.map_err(to_error)?;
            file_values.insert(key, value);
        }
        Self::from_lookup(|key| env::var(key).ok().or_else(|| file_values.get(key).cloned()))
    }

    /// Builds settings from an arbitrary key lookup, then validates them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a value is malformed or out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut settings = Self::default();

        macro_rules! load {
            ($key:literal, $field:ident, $parse:expr) => {
                if let Some(raw) = get($key) {
                    settings.$field = $parse($key, &raw)?;
                }
            };
        }

        load!("USE_PROXY", use_proxy, parse_bool);
        load!("PROXY_SOURCES", proxy_sources, parse_list_value);
        load!("CUSTOM_PROXIES", custom_proxies, parse_list_value);
        load!("PROXY_PROBE_URL", proxy_probe_url, parse_string);
        load!("PROXY_PROBE_LIMIT", proxy_probe_limit, parse_number);
        load!("PROXY_PROBE_TIMEOUT_SECS", proxy_probe_timeout_secs, parse_number);
        load!("IDENTITY_POOL_SIZE", identity_pool_size, parse_number);
        load!("RATE_LIMIT_REQUESTS", rate_limit_requests, parse_number);
        load!("RATE_LIMIT_PERIOD", rate_limit_period_secs, parse_number);
        load!("USER_RATE_LIMIT", user_rate_limit, parse_number);
        load!("ADMISSION_TIMEOUT_SECS", admission_timeout_secs, parse_number);
        load!("CACHE_ENABLED", cache_enabled, parse_bool);
        load!("CACHE_TTL", cache_ttl_secs, parse_number);
        load!("CACHE_MAX_SIZE", cache_max_size, parse_number);
        load!("MAX_RETRIES", max_retries, parse_number);
        load!("RETRY_DELAY_MS", retry_delay_ms, parse_number);
        load!("CONNECT_TIMEOUT", connect_timeout_secs, parse_number);
        load!("READ_TIMEOUT", read_timeout_secs, parse_number);
        load!("EXTRACTION_DEADLINE_SECS", extraction_deadline_secs, parse_optional_number);
        load!("SHARE_DOMAINS", share_domains, parse_list_value);
        load!("API_BASES", api_bases, parse_list_value);
        load!("PAGE_BASES", page_bases, parse_list_value);
        load!("RELAY_ENDPOINTS", relay_endpoints, parse_list_value);

        settings.validate()?;
        Ok(settings)
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::InvalidValue`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("PROXY_PROBE_LIMIT", self.proxy_probe_limit, 0, 10_000)?;
        check_range("PROXY_PROBE_TIMEOUT_SECS", self.proxy_probe_timeout_secs, 1, 3600)?;
        check_range("IDENTITY_POOL_SIZE", self.identity_pool_size, 1, 1000)?;
        check_range("RATE_LIMIT_REQUESTS", self.rate_limit_requests, 1, 100_000)?;
        check_range("RATE_LIMIT_PERIOD", self.rate_limit_period_secs, 1, 86_400)?;
        check_range("USER_RATE_LIMIT", self.user_rate_limit, 1, 100_000)?;
        if self.user_rate_limit >= self.rate_limit_requests {
            return Err(ConfigError::invalid(
                "USER_RATE_LIMIT",
                self.user_rate_limit,
                format!("less than RATE_LIMIT_REQUESTS ({})", self.rate_limit_requests),
            ));
        }
        check_range("ADMISSION_TIMEOUT_SECS", self.admission_timeout_secs, 0, 3600)?;
        check_range("CACHE_TTL", self.cache_ttl_secs, 1, 604_800)?;
        check_range("CACHE_MAX_SIZE", self.cache_max_size, 1, 1_000_000)?;
        check_range("MAX_RETRIES", self.max_retries, 0, 20)?;
        check_range("RETRY_DELAY_MS", self.retry_delay_ms, 1, 60_000)?;
        check_range("CONNECT_TIMEOUT", self.connect_timeout_secs, 1, 3600)?;
        check_range("READ_TIMEOUT", self.read_timeout_secs, 1, 3600)?;
        if let Some(deadline) = self.extraction_deadline_secs {
            check_range("EXTRACTION_DEADLINE_SECS", deadline, 1, 3600)?;
        }

        if self.share_domains.is_empty() {
            return Err(ConfigError::invalid(
                "SHARE_DOMAINS",
                "",
                "at least one domain",
            ));
        }
        check_http_url("PROXY_PROBE_URL", &self.proxy_probe_url)?;
        for (key, urls) in [
            ("PROXY_SOURCES", &self.proxy_sources),
            ("API_BASES", &self.api_bases),
            ("PAGE_BASES", &self.page_bases),
            ("RELAY_ENDPOINTS", &self.relay_endpoints),
        ] {
            for url in urls {
                check_http_url(key, url)?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn http_timeouts(&self) -> HttpTimeouts {
        HttpTimeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            read: Duration::from_secs(self.read_timeout_secs),
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    #[must_use]
    pub fn rate_limiter(&self) -> RateLimiter {
        let period = Duration::from_secs(self.rate_limit_period_secs);
        RateLimiter::new(
            BucketConfig::per_period(self.rate_limit_requests, period),
            BucketConfig::per_period(self.user_rate_limit, period),
        )
    }

    #[must_use]
    pub fn proxy_pool_config(&self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            enabled: self.use_proxy,
            static_proxies: self.custom_proxies.clone(),
            sources: self.proxy_sources.clone(),
            probe_url: self.proxy_probe_url.clone(),
            probe_limit: self.proxy_probe_limit,
            probe_timeout: Duration::from_secs(self.proxy_probe_timeout_secs),
            cooldown: DESTINATION_COOLDOWN,
        }
    }

    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            admission_timeout: Duration::from_secs(self.admission_timeout_secs),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            deadline: self.extraction_deadline_secs.map(Duration::from_secs),
        }
    }

    #[must_use]
    pub fn target_matcher(&self) -> TargetMatcher {
        TargetMatcher::new(&self.share_domains)
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, raw, "true or false")),
    }
}

fn parse_number<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::invalid(key, raw, "a non-negative integer"))
}

fn parse_optional_number(key: &'static str, raw: &str) -> Result<Option<u64>, ConfigError> {
    parse_number(key, raw).map(Some)
}

#[allow(clippy::unnecessary_wraps)]
fn parse_string(_key: &'static str, raw: &str) -> Result<String, ConfigError> {
    Ok(raw.to_string())
}

#[allow(clippy::unnecessary_wraps)]
fn parse_list_value(_key: &'static str, raw: &str) -> Result<Vec<String>, ConfigError> {
    Ok(parse_list(raw))
}

/// Splits on commas and whitespace, dropping empty items.
#[must_use]
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn check_range<T>(key: &'static str, value: T, min: T, max: T) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(ConfigError::invalid(key, &value, format!("range {min}..={max}")));
    }
    Ok(())
}

fn check_http_url(key: &'static str, value: &str) -> Result<(), ConfigError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
        _ => Err(ConfigError::invalid(key, value, "an http(s) URL")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.use_proxy);
        assert_eq!(settings.rate_limit_requests, 30);
        assert_eq!(settings.user_rate_limit, 10);
        assert_eq!(settings.cache_ttl_secs, 3600);
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.extraction_deadline_secs, None);
        assert_eq!(settings.proxy_sources.len(), 3);
    }

    #[test]
    fn test_overrides_and_lists() {
        let settings = Settings::from_lookup(lookup(&[
            ("USE_PROXY", "FALSE"),
            ("CUSTOM_PROXIES", "1.2.3.4:80, socks5://5.6.7.8:1080\nhttp://9.9.9.9:3128"),
            ("MAX_RETRIES", "2"),
            ("EXTRACTION_DEADLINE_SECS", "45"),
            ("SHARE_DOMAINS", "terabox.com,dubox.com"),
            ("CACHE_TTL", "  "),
        ]))
        .unwrap();
        assert!(!settings.use_proxy);
        assert_eq!(
            settings.custom_proxies,
            ["1.2.3.4:80", "socks5://5.6.7.8:1080", "http://9.9.9.9:3128"]
        );
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.extraction_deadline_secs, Some(45));
        assert_eq!(settings.share_domains, ["terabox.com", "dubox.com"]);
        assert_eq!(settings.cache_ttl_secs, 3600);
        assert_eq!(
            settings.orchestrator_config().deadline,
            Some(Duration::from_secs(45))
        );
        assert!(!settings.proxy_pool_config().enabled);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for (key, value) in [
            ("USE_PROXY", "maybe"),
            ("MAX_RETRIES", "-1"),
            ("MAX_RETRIES", "50"),
            ("CACHE_MAX_SIZE", "0"),
            ("CONNECT_TIMEOUT", "0"),
            ("RETRY_DELAY_MS", "0"),
            ("PROXY_PROBE_URL", "not-a-url"),
            ("API_BASES", "ftp://files.example"),
        ] {
            let err = Settings::from_lookup(lookup(&[(key, value)])).unwrap_err();
            let message = err.to_string();
            assert!(message.contains(key), "{key}={value}: {message}");
            assert!(message.contains("Suggestion:"));
        }
    }

    #[test]
    fn test_caller_limit_must_be_below_global_limit() {
        for user_limit in ["50", "5"] {
            let err = Settings::from_lookup(lookup(&[
                ("RATE_LIMIT_REQUESTS", "5"),
                ("USER_RATE_LIMIT", user_limit),
            ]))
            .unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { key: "USER_RATE_LIMIT", .. }),
                "{err}"
            );
            assert!(err.to_string().contains("RATE_LIMIT_REQUESTS (5)"));
        }

        let settings = Settings::from_lookup(lookup(&[
            ("RATE_LIMIT_REQUESTS", "5"),
            ("USER_RATE_LIMIT", "4"),
        ]))
        .unwrap();
        assert_eq!(settings.user_rate_limit, 4);
    }

    #[test]
    fn test_empty_share_domains_rejected() {
        let settings = Settings {
            share_domains: Vec::new(),
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue { key: "SHARE_DOMAINS", .. })
        ));
    }

    #[test]
    fn test_from_env_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# sharelink settings").unwrap();
        writeln!(file, "SHARELINK_TEST_UNUSED=1").unwrap();
        writeln!(file, "RELAY_ENDPOINTS=https://relay.example/api").unwrap();
        writeln!(file, "PROXY_PROBE_LIMIT=7").unwrap();
        file.flush().unwrap();

        let settings = Settings::from_env_file(file.path()).unwrap();
        assert_eq!(settings.relay_endpoints, ["https://relay.example/api"]);
        assert_eq!(settings.proxy_probe_limit, 7);
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(" a, b ,,c\td "), ["a", "b", "c", "d"]);
        assert!(parse_list("").is_empty());
    }
}
