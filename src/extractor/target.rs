//! Share-link recognition and normalization.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use url::Url;

use super::error::ExtractError;

/// Hosts recognized as share services when none are configured.
pub const DEFAULT_SHARE_DOMAINS: &[&str] = &[
    "terabox.com",
    "teraboxapp.com",
    "terabox.app",
    "terabox.fun",
    "terabox.co",
    "1024tera.com",
    "1024terabox.com",
    "4funbox.com",
    "mirrobox.com",
    "nephobox.com",
    "momerybox.com",
    "freeterabox.com",
    "boxterafile.com",
    "teraboxlink.com",
    "terasharelink.com",
    "teraboxshare.com",
    "terafileshare.com",
    "teradrive.link",
    "gcloud.live",
    "dubox.com",
    "digiboxx.com",
    "terabox.tech",
    "terabox.club",
    "terabox.me",
    "terabox.to",
    "teraboxdownload.com",
    "teraboxvideo.com",
    "tera-box.com",
    "terabox.cc",
    "tboxlink.com",
    "terabox.site",
    "terabox.online",
    "terabox.xyz",
    "terabox.jp",
    "terabox.in",
    "terabox.kr",
    "xhosting.link",
    "filecloud.me",
    "boxcloud.me",
];

/// Compiles a regex at static init; panics on invalid pattern.
pub fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// `/s/<id>` paths and `surl=<id>` query parameters. A leading `1` is not
/// part of the captured id.
static SHARE_ID_PATTERNS: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        compile_static_regex(r"/s/1?([A-Za-z0-9_-]+)"),
        compile_static_regex(r"[?&]surl=1?([A-Za-z0-9_-]+)"),
    ]
});

/// Extracts the share id from a share URL, without the leading `1`.
///
/// # Examples
///
/// ```
/// use sharelink_core::extractor::extract_share_id;
///
/// assert_eq!(extract_share_id("https://www.terabox.com/s/1AbC-d_9").as_deref(), Some("AbC-d_9"));
/// assert_eq!(extract_share_id("https://terabox.com/sharing/link?surl=XyZ").as_deref(), Some("XyZ"));
/// assert_eq!(extract_share_id("https://terabox.com/main"), None);
/// ```
#[must_use]
pub fn extract_share_id(url: &str) -> Option<String> {
    SHARE_ID_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(url))
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
}

/// A validated share link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareTarget {
    url: String,
    host: String,
    cache_key: String,
    share_id: Option<String>,
}

impl ShareTarget {
    /// The link as submitted (trimmed).
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Lower-cased host without `www.`.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Normalized key identifying this link in the result cache.
    #[must_use]
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Share id without the leading `1`, when the link carries one.
    #[must_use]
    pub fn share_id(&self) -> Option<&str> {
        self.share_id.as_deref()
    }

    /// Share id in the `1`-prefixed form the share API expects.
    #[must_use]
    pub fn api_share_id(&self) -> Option<String> {
        self.share_id.as_deref().map(|id| {
            if id.starts_with('1') {
                id.to_string()
            } else {
                format!("1{id}")
            }
        })
    }
}

/// Cache key for a parsed URL: lower-case host without `www.`, no fragment.
#[must_use]
pub fn normalize_cache_key(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    if let Some(host) = url.host_str()
        && let Some(stripped) = host.strip_prefix("www.")
        && normalized.set_host(Some(stripped)).is_err()
    {
        debug!(host, "could not strip www. from cache key");
    }
    format!("extract:{normalized}")
}

/// Decides which links are share links.
#[derive(Debug, Clone)]
pub struct TargetMatcher {
    domains: Vec<String>,
}

impl Default for TargetMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SHARE_DOMAINS.iter().copied())
    }
}

impl TargetMatcher {
    /// Creates a matcher for `domains` (case-insensitive, `www.` ignored).
    #[must_use]
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|domain| {
                let domain = domain.as_ref().trim().trim_start_matches('.').to_ascii_lowercase();
                domain
                    .strip_prefix("www.")
                    .map(str::to_string)
                    .unwrap_or(domain)
            })
            .filter(|domain| !domain.is_empty())
            .collect();
        Self { domains }
    }

    #[must_use]
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Whether `host` is a recognized domain or a subdomain of one.
    #[must_use]
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        self.domains.iter().any(|domain| {
            host == domain.as_str()
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// Validates `input` as a share link.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidInput`] when the input is not an
    /// `http(s)` URL on a recognized share domain.
    pub fn parse(&self, input: &str) -> Result<ShareTarget, ExtractError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ExtractError::invalid_input(input, "empty input"));
        }
        let url = Url::parse(trimmed)
            .map_err(|error| ExtractError::invalid_input(trimmed, &format!("not a URL ({error})")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ExtractError::invalid_input(
                trimmed,
                &format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ExtractError::invalid_input(trimmed, "URL has no host"))?
            .to_ascii_lowercase();
        if !self.matches_host(&host) {
            return Err(ExtractError::invalid_input(
                trimmed,
                &format!("'{host}' is not a recognized share domain"),
            ));
        }

        let host = host.strip_prefix("www.").map(str::to_string).unwrap_or(host);
        Ok(ShareTarget {
            url: trimmed.to_string(),
            cache_key: normalize_cache_key(&url),
            share_id: extract_share_id(trimmed),
            host,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Share Id Tests ====================

    #[test]
    fn test_compile_static_regex_valid_pattern() {
        let re = compile_static_regex(r"/s/(\w+)");
        assert_eq!(&re.captures("/s/abc").unwrap()[1], "abc");
    }

    #[test]
    #[should_panic(expected = "invalid static regex")]
    fn test_compile_static_regex_panics_on_invalid_pattern() {
        let _ = compile_static_regex(r"(unclosed");
    }

    #[test]
    fn test_extract_share_id_patterns() {
        assert_eq!(
            extract_share_id("https://www.terabox.com/s/1abcDEF").as_deref(),
            Some("abcDEF")
        );
        assert_eq!(
            extract_share_id("https://terabox.com/s/xyz_12-3?x=1").as_deref(),
            Some("xyz_12-3")
        );
        assert_eq!(
            extract_share_id("https://terabox.com/sharing/link?surl=1Qq9").as_deref(),
            Some("Qq9")
        );
        assert_eq!(
            extract_share_id("https://terabox.com/wap/share/filelist?foo=1&surl=Zz").as_deref(),
            Some("Zz")
        );
        assert_eq!(extract_share_id("https://terabox.com/"), None);
    }

    #[test]
    fn test_api_share_id_adds_leading_one() {
        let matcher = TargetMatcher::default();
        let target = matcher.parse("https://terabox.com/s/1abc").unwrap();
        assert_eq!(target.share_id(), Some("abc"));
        assert_eq!(target.api_share_id().as_deref(), Some("1abc"));

        let target = matcher.parse("https://terabox.com/sharing/link?surl=abc").unwrap();
        assert_eq!(target.api_share_id().as_deref(), Some("1abc"));
    }

    // ==================== Matching Tests ====================

    #[test]
    fn test_matches_host_on_label_boundary() {
        let matcher = TargetMatcher::new(["terabox.com", "WWW.Dubox.com"]);
        assert_eq!(matcher.domains(), ["terabox.com", "dubox.com"]);
        assert!(matcher.matches_host("terabox.com"));
        assert!(matcher.matches_host("WWW.TERABOX.COM"));
        assert!(matcher.matches_host("cdn.terabox.com"));
        assert!(matcher.matches_host("dubox.com"));
        assert!(!matcher.matches_host("notterabox.com"));
        assert!(!matcher.matches_host("terabox.com.evil.example"));
    }

    #[test]
    fn test_parse_rejects_invalid_inputs() {
        let matcher = TargetMatcher::default();
        for input in [
            "",
            "   ",
            "not a url",
            "ftp://terabox.com/s/1abc",
            "https://example.com/s/1abc",
            "mailto:someone@terabox.com",
        ] {
            let err = matcher.parse(input).unwrap_err();
            assert!(
                matches!(err, ExtractError::InvalidInput { .. }),
                "{input:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_parse_accepts_share_link() {
        let target = TargetMatcher::default()
            .parse("  https://www.1024tera.com/s/1AbC#frag ")
            .unwrap();
        assert_eq!(target.url(), "https://www.1024tera.com/s/1AbC#frag");
        assert_eq!(target.host(), "1024tera.com");
        assert_eq!(target.share_id(), Some("AbC"));
    }

    // ==================== Cache Key Tests ====================

    #[test]
    fn test_cache_key_normalization() {
        let matcher = TargetMatcher::default();
        let a = matcher.parse("https://WWW.TeraBox.com/s/1AbC#top").unwrap();
        let b = matcher.parse("https://terabox.com/s/1AbC").unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "extract:https://terabox.com/s/1AbC");

        // Path case and query are significant.
        let c = matcher.parse("https://terabox.com/s/1abc").unwrap();
        assert_ne!(a.cache_key(), c.cache_key());
        let d = matcher.parse("https://terabox.com/s/1AbC?pwd=x").unwrap();
        assert_ne!(b.cache_key(), d.cache_key());
    }
}
