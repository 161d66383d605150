//! Strategy that scrapes the public share page for embedded listing state.
//!
//! Share pages ship the file listing inside inline scripts. Several layouts
//! exist, so each fetched page goes through a chain of extractors:
//! `window.__INITIAL_STATE__`, `locals.mset(...)`, the mobile `window.yunData`,
//! and finally a bare `"file_list"`/`"list"` array.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument};

use super::listing::{find_file_list, parse_file_list};
use crate::extractor::{
    ExtractionOutcome, FileDescriptor, ShareTarget, Strategy, compile_static_regex,
};
use crate::network::{Payload, RequestExecutor, RequestSpec};

const STRATEGY_NAME: &str = "page_scrape";
const PRIORITY: u8 = 3;

/// Share-page origins tried before the submitted link itself.
pub const DEFAULT_PAGE_BASES: [&str; 3] = [
    "https://www.terabox.com",
    "https://www.teraboxapp.com",
    "https://www.1024tera.com",
];

static INITIAL_STATE_RES: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        compile_static_regex(r"(?s)window\.__INITIAL_STATE__\s*=\s*(\{.+?\});?\s*</script>"),
        compile_static_regex(r"(?s)window\.__INITIAL_STATE__\s*=\s*(\{.+?\})\s*;?\s*\n"),
    ]
});
static LOCALS_MSET_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?s)locals\.mset\s*\(\s*(\{.+?\})\s*\)"));
static YUN_DATA_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?s)window\.yunData\s*=\s*(\{.+?\});"));
static FILE_LIST_ARRAY_RES: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        compile_static_regex(r#"(?s)"file_list"\s*:\s*(\[.+?\])\s*[,}]"#),
        compile_static_regex(r#"(?s)"list"\s*:\s*(\[.+?\])\s*[,}]"#),
    ]
});
static TRAILING_COMMA_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r",\s*([}\]])"));

type PageExtractor = fn(&str) -> Vec<FileDescriptor>;

const PAGE_EXTRACTORS: [(&str, PageExtractor); 4] = [
    ("initial_state", extract_initial_state),
    ("locals_mset", extract_locals_mset),
    ("yun_data", extract_yun_data),
    ("file_list_array", extract_file_list_array),
];

/// Parses the first capture of each pattern as JSON until one yields files.
fn first_listing<'a>(
    html: &str,
    patterns: impl IntoIterator<Item = &'a Regex>,
    clean: bool,
    extract: impl Fn(&Value) -> Vec<FileDescriptor>,
) -> Vec<FileDescriptor> {
    patterns
        .into_iter()
        .filter_map(|pattern| pattern.captures(html)?.get(1).map(|m| m.as_str()))
        .filter_map(|raw| {
            if clean {
                serde_json::from_str::<Value>(&strip_trailing_commas(raw)).ok()
            } else {
                serde_json::from_str::<Value>(raw).ok()
            }
        })
        .map(|value| extract(&value))
        .find(|files| !files.is_empty())
        .unwrap_or_default()
}

/// Removes trailing commas before `}` and `]`, as found in hand-written scripts.
fn strip_trailing_commas(raw: &str) -> String {
    TRAILING_COMMA_RE.replace_all(raw, "$1").into_owned()
}

fn extract_initial_state(html: &str) -> Vec<FileDescriptor> {
    first_listing(html, INITIAL_STATE_RES.iter(), false, |state| {
        find_file_list(
            state,
            &[&["shareInfo", "file_list", "list"], &["file_list", "list"], &["list"]],
        )
    })
}

fn extract_locals_mset(html: &str) -> Vec<FileDescriptor> {
    first_listing(html, [&*LOCALS_MSET_RE], true, |locals| {
        find_file_list(locals, &[&["file_list", "list"], &["file_list"]])
    })
}

pub(super) fn extract_yun_data(html: &str) -> Vec<FileDescriptor> {
    first_listing(html, [&*YUN_DATA_RE], false, |data| {
        find_file_list(data, &[&["list"], &["file_list", "list"], &["file_list"]])
    })
}

fn extract_file_list_array(html: &str) -> Vec<FileDescriptor> {
    first_listing(html, FILE_LIST_ARRAY_RES.iter(), false, parse_file_list)
}

/// Runs every page extractor in order and returns the first listing found.
#[must_use]
pub fn extract_from_html(html: &str) -> Option<(&'static str, Vec<FileDescriptor>)> {
    PAGE_EXTRACTORS.iter().find_map(|(name, extractor)| {
        let files = extractor(html);
        (!files.is_empty()).then_some((*name, files))
    })
}

/// Fetches share pages and extracts the embedded listing.
pub struct PageScrapeStrategy {
    page_bases: Vec<String>,
}

impl Default for PageScrapeStrategy {
    fn default() -> Self {
        Self::with_page_bases(DEFAULT_PAGE_BASES)
    }
}

impl PageScrapeStrategy {
    #[must_use]
    pub fn with_page_bases<I, S>(page_bases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            page_bases: page_bases
                .into_iter()
                .map(|base| base.as_ref().trim().trim_end_matches('/').to_string())
                .filter(|base| !base.is_empty())
                .collect(),
        }
    }

    /// Pages to fetch: `/s/<id>` on each origin, then the submitted link.
    #[must_use]
    pub fn candidate_pages(&self, target: &ShareTarget) -> Vec<String> {
        let mut pages: Vec<String> = match target.api_share_id() {
            Some(id) => self
                .page_bases
                .iter()
                .map(|base| format!("{base}/s/{id}"))
                .collect(),
            None => Vec::new(),
        };
        if !pages.iter().any(|page| page == target.url()) {
            pages.push(target.url().to_string());
        }
        pages
    }
}

impl std::fmt::Debug for PageScrapeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageScrapeStrategy")
            .field("page_bases", &self.page_bases)
            .finish()
    }
}

#[async_trait]
impl Strategy for PageScrapeStrategy {
    fn name(&self) -> &str {
        STRATEGY_NAME
    }

    fn priority(&self) -> u8 {
        PRIORITY
    }

    #[instrument(skip(self, target, executor), fields(strategy = STRATEGY_NAME, url = %target.url()))]
    async fn attempt(&self, target: &ShareTarget, executor: &RequestExecutor) -> ExtractionOutcome {
        let mut last_reason = String::from("no pages to scrape");
        for page in self.candidate_pages(target) {
            let request = RequestSpec::get(page.as_str())
                .header("Accept", "text/html,application/xhtml+xml,*/*;q=0.8");
            let response = match executor.execute(&request).await {
                Ok(response) => response,
                Err(error) => {
                    debug!(page = %page, error = %error, "page fetch failed");
                    last_reason = format!("{page}: {error}");
                    continue;
                }
            };

            let found = match &response.payload {
                Payload::Text(html) => extract_from_html(html),
                Payload::Json(data) => {
                    let files = find_file_list(data, &[&["list"], &["file_list", "list"]]);
                    (!files.is_empty()).then_some(("json_body", files))
                }
            };
            match found {
                Some((extractor, files)) => {
                    debug!(page = %page, extractor, files = files.len(), "page listing extracted");
                    return ExtractionOutcome::success(STRATEGY_NAME, files);
                }
                None => {
                    debug!(page = %page, "no listing embedded in page");
                    last_reason = format!("{page}: no file listing in page");
                }
            }
        }
        ExtractionOutcome::failure(last_reason)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::extractor::TargetMatcher;

    #[test]
    fn test_initial_state_before_script_end() {
        let html = r#"<html><script>window.__INITIAL_STATE__ = {"shareInfo":{"file_list":{"list":[{"server_filename":"a.mp4","size":10}]}}};</script></html>"#;
        let (extractor, files) = extract_from_html(html).unwrap();
        assert_eq!(extractor, "initial_state");
        assert_eq!(files[0].filename, "a.mp4");
        assert!(files[0].is_video);
    }

    #[test]
    fn test_locals_mset_with_trailing_commas() {
        let html = "<script>locals.mset({\n \"file_list\": {\"list\": [{\"server_filename\": \"doc.pdf\", \"size\": 3,},],},\n});</script>";
        let (extractor, files) = extract_from_html(html).unwrap();
        assert_eq!(extractor, "locals_mset");
        assert_eq!(files[0].filename, "doc.pdf");
        assert_eq!(files[0].size_bytes, 3);
    }

    #[test]
    fn test_yun_data_listing() {
        let html = r#"<script>window.yunData = {"list":[{"server_filename":"clip.mov","dlink":"https://d/1"}]};</script>"#;
        let (extractor, files) = extract_from_html(html).unwrap();
        assert_eq!(extractor, "yun_data");
        assert_eq!(files[0].direct_link, "https://d/1");
    }

    #[test]
    fn test_bare_file_list_array() {
        let html = r#"var x = {"file_list": [{"filename": "b.zip", "size": "9"}], "other": 1};"#;
        let (extractor, files) = extract_from_html(html).unwrap();
        assert_eq!(extractor, "file_list_array");
        assert_eq!(files[0].filename, "b.zip");
        assert_eq!(files[0].size_bytes, 9);
    }

    #[test]
    fn test_page_without_listing() {
        assert!(extract_from_html("<html><body>Link expired</body></html>").is_none());
        assert!(extract_from_html(r#"window.__INITIAL_STATE__ = {"list": []};</script>"#).is_none());
    }

    #[test]
    fn test_candidate_pages() {
        let strategy = PageScrapeStrategy::with_page_bases(["https://a.example/", "https://b.example"]);
        let target = TargetMatcher::default()
            .parse("https://terabox.com/s/1xyz")
            .unwrap();
        assert_eq!(
            strategy.candidate_pages(&target),
            [
                "https://a.example/s/1xyz",
                "https://b.example/s/1xyz",
                "https://terabox.com/s/1xyz"
            ]
        );

        let duplicate = PageScrapeStrategy::with_page_bases(["https://terabox.com"]);
        assert_eq!(duplicate.candidate_pages(&target), ["https://terabox.com/s/1xyz"]);
    }
}
