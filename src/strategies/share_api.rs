//! Strategy backed by the share service's own JSON API.
//!
//! For each configured origin the strategy calls `/api/shorturlinfo` and then
//! `/share/list`, accepting the first response with `errno == 0` and a
//! non-empty `list`. Origins are mirrors of the same service, so a block on
//! one is often not a block on the next.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::listing::find_file_list;
use crate::extractor::{ExtractionOutcome, FileDescriptor, ShareTarget, Strategy};
use crate::network::{RequestExecutor, RequestSpec};

const STRATEGY_NAME: &str = "share_api";
const PRIORITY: u8 = 1;

/// Web client application id the share API expects.
const WEB_APP_ID: &str = "250528";

/// Share-API origins tried in order when none are configured.
pub const DEFAULT_API_BASES: [&str; 8] = [
    "https://www.terabox.com",
    "https://www.teraboxapp.com",
    "https://www.1024tera.com",
    "https://www.4funbox.com",
    "https://www.mirrobox.com",
    "https://www.nephobox.com",
    "https://www.freeterabox.com",
    "https://www.momerybox.com",
];

#[derive(Debug, Clone, Copy)]
enum Endpoint {
    ShortUrlInfo,
    ShareList,
}

impl Endpoint {
    const ALL: [Self; 2] = [Self::ShortUrlInfo, Self::ShareList];

    fn path(self) -> &'static str {
        match self {
            Self::ShortUrlInfo => "/api/shorturlinfo",
            Self::ShareList => "/share/list",
        }
    }

    fn query(self, share_id: &str) -> Vec<(&'static str, String)> {
        let mut query = vec![("shorturl", share_id.to_string()), ("root", "1".to_string())];
        match self {
            Self::ShortUrlInfo => query.extend([
                ("app_id", WEB_APP_ID.to_string()),
                ("web", "1".to_string()),
                ("channel", "dubox".to_string()),
                ("clienttype", "0".to_string()),
            ]),
            Self::ShareList => {
                query.extend([("page", "1".to_string()), ("num", "100".to_string())]);
            }
        }
        query
    }
}

/// Calls the share API on each configured origin.
pub struct ShareApiStrategy {
    api_bases: Vec<String>,
}

impl Default for ShareApiStrategy {
    fn default() -> Self {
        Self::with_api_bases(DEFAULT_API_BASES)
    }
}

impl ShareApiStrategy {
    /// Uses `api_bases` (origins such as `https://www.terabox.com`) in order.
    #[must_use]
    pub fn with_api_bases<I, S>(api_bases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            api_bases: api_bases
                .into_iter()
                .map(|base| base.as_ref().trim().trim_end_matches('/').to_string())
                .filter(|base| !base.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn api_bases(&self) -> &[String] {
        &self.api_bases
    }

    async fn call(
        &self,
        executor: &RequestExecutor,
        base: &str,
        endpoint: Endpoint,
        share_id: &str,
    ) -> Result<Vec<FileDescriptor>, String> {
        let url = Url::parse_with_params(&format!("{base}{}", endpoint.path()), endpoint.query(share_id))
            .map_err(|error| format!("bad API base {base}: {error}"))?;
        let request = RequestSpec::get(url.as_str())
            .header("Referer", format!("{base}/"))
            .header("Origin", base)
            .header("Accept", "application/json, text/plain, */*");

        let response = executor
            .execute(&request)
            .await
            .map_err(|error| error.to_string())?;
        let data = response
            .payload
            .to_json()
            .ok_or_else(|| "response is not JSON".to_string())?;
        check_errno(&data)?;

        let files = find_file_list(&data, &[&["list"], &["file_list", "list"]]);
        if files.is_empty() {
            return Err("empty file list".to_string());
        }
        Ok(files)
    }
}

/// Accepts only `errno == 0`; a missing `errno` counts as an error.
fn check_errno(data: &Value) -> Result<(), String> {
    match data.get("errno").and_then(Value::as_i64) {
        Some(0) => Ok(()),
        Some(errno) => Err(format!("errno {errno}")),
        None => Err("missing errno".to_string()),
    }
}

impl std::fmt::Debug for ShareApiStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareApiStrategy")
            .field("api_bases", &self.api_bases)
            .finish()
    }
}

#[async_trait]
impl Strategy for ShareApiStrategy {
    fn name(&self) -> &str {
        STRATEGY_NAME
    }

    fn priority(&self) -> u8 {
        PRIORITY
    }

    #[instrument(skip(self, target, executor), fields(strategy = STRATEGY_NAME, url = %target.url()))]
    async fn attempt(&self, target: &ShareTarget, executor: &RequestExecutor) -> ExtractionOutcome {
        let Some(share_id) = target.api_share_id() else {
            return ExtractionOutcome::failure("link carries no share id");
        };

        let mut last_reason = String::from("no API bases configured");
        for base in &self.api_bases {
            for endpoint in Endpoint::ALL {
                match self.call(executor, base, endpoint, &share_id).await {
                    Ok(files) => {
                        debug!(base = %base, endpoint = endpoint.path(), files = files.len(), "share API returned files");
                        return ExtractionOutcome::success(STRATEGY_NAME, files);
                    }
                    Err(reason) => {
                        debug!(base = %base, reason = %reason, "share API call failed");
                        last_reason = format!("{base}{}: {reason}", endpoint.path());
                    }
                }
            }
        }
        ExtractionOutcome::failure(last_reason)
    }
}
