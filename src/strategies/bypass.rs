//! Last-resort strategy that poses as the service's mobile and app clients.
//!
//! Three sub-methods run in order against one origin:
//!
//! | Method | Request |
//! |--------|---------|
//! | `mobile_api` | `/share/list` as the Android client |
//! | `app_api` | signed `/api/shorturlinfo` as the app client |
//! | `wap` | `/wap/share/filelist` page, `window.yunData` listing |

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, instrument};
use url::Url;

use super::listing::find_file_list;
use super::page_scrape::extract_yun_data;
use crate::extractor::{ExtractionOutcome, FileDescriptor, ShareTarget, Strategy};
use crate::network::{RequestExecutor, RequestSpec};

const STRATEGY_NAME: &str = "bypass";
const PRIORITY: u8 = 5;

/// Origin used when none is configured.
pub const DEFAULT_BYPASS_BASE: &str = "https://www.terabox.com";

/// Application id signed into app-client requests.
const APP_ID: &str = "250528";

const ANDROID_USER_AGENT: &str = "terabox;4.5.0;Android;14;SM-S918B";
const IPHONE_USER_AGENT: &str =
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    MobileApi,
    AppApi,
    Wap,
}

impl Method {
    const ALL: [Self; 3] = [Self::MobileApi, Self::AppApi, Self::Wap];

    fn name(self) -> &'static str {
        match self {
            Self::MobileApi => "mobile_api",
            Self::AppApi => "app_api",
            Self::Wap => "wap",
        }
    }
}

/// Signature the app API expects: lower-case hex MD5 of
/// `shorturl=<id>&timestamp=<ms>&app_id=<app id>`.
#[must_use]
pub fn app_sign(share_id: &str, timestamp_ms: u128) -> String {
    let payload = format!("shorturl={share_id}&timestamp={timestamp_ms}&app_id={APP_ID}");
    format!("{:x}", md5::compute(payload.as_bytes()))
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

/// Mobile, app and WAP client requests against one share origin.
pub struct BypassStrategy {
    base: String,
}

impl Default for BypassStrategy {
    fn default() -> Self {
        Self::with_base(DEFAULT_BYPASS_BASE)
    }
}

impl BypassStrategy {
    /// Uses `base` (an origin such as `https://www.terabox.com`).
    #[must_use]
    pub fn with_base(base: impl AsRef<str>) -> Self {
        Self {
            base: base.as_ref().trim().trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    fn request(&self, method: Method, share_id: &str) -> Result<RequestSpec, String> {
        let (path, query): (&str, Vec<(&str, String)>) = match method {
            Method::MobileApi => (
                "/share/list",
                vec![
                    ("shorturl", share_id.to_string()),
                    ("root", "1".to_string()),
                    ("page", "1".to_string()),
                    ("num", "100".to_string()),
                    ("clienttype", "1".to_string()),
                    ("channel", "android".to_string()),
                ],
            ),
            Method::AppApi => {
                let timestamp = unix_millis();
                (
                    "/api/shorturlinfo",
                    vec![
                        ("shorturl", share_id.to_string()),
                        ("timestamp", timestamp.to_string()),
                        ("sign", app_sign(share_id, timestamp)),
                        ("app_id", APP_ID.to_string()),
                        ("clienttype", "5".to_string()),
                    ],
                )
            }
            Method::Wap => ("/wap/share/filelist", vec![("surl", share_id.to_string())]),
        };

        let url = Url::parse_with_params(&format!("{}{path}", self.base), query)
            .map_err(|error| format!("bad bypass base {}: {error}", self.base))?;
        let request = RequestSpec::get(url.as_str());
        Ok(match method {
            Method::MobileApi => request.header("User-Agent", ANDROID_USER_AGENT),
            Method::AppApi => request,
            Method::Wap => request.header("User-Agent", IPHONE_USER_AGENT),
        })
    }

    async fn run(
        &self,
        executor: &RequestExecutor,
        method: Method,
        share_id: &str,
    ) -> Result<Vec<FileDescriptor>, String> {
        let request = self.request(method, share_id)?;
        let response = executor
            .execute(&request)
            .await
            .map_err(|error| error.to_string())?;

        let files = if method == Method::Wap {
            let html = response
                .payload
                .as_text()
                .ok_or_else(|| "wap page is not HTML".to_string())?;
            extract_yun_data(html)
        } else {
            let data = response
                .payload
                .to_json()
                .ok_or_else(|| "response is not JSON".to_string())?;
            match data.get("errno").and_then(serde_json::Value::as_i64) {
                Some(0) => {}
                Some(errno) => return Err(format!("errno {errno}")),
                None => return Err("missing errno".to_string()),
            }
            find_file_list(&data, &[&["list"]])
        };

        if files.is_empty() {
            return Err("empty file list".to_string());
        }
        Ok(files)
    }
}

impl std::fmt::Debug for BypassStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BypassStrategy")
            .field("base", &self.base)
            .finish()
    }
}

#[async_trait]
impl Strategy for BypassStrategy {
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

        let mut last_reason = String::new();
        for method in Method::ALL {
            match self.run(executor, method, &share_id).await {
                Ok(files) => {
                    debug!(method = method.name(), files = files.len(), "bypass method returned files");
                    return ExtractionOutcome::success(format!("{STRATEGY_NAME}:{}", method.name()), files);
                }
                Err(reason) => {
                    debug!(method = method.name(), reason = %reason, "bypass method failed");
                    last_reason = format!("{}: {reason}", method.name());
                }
            }
        }
        ExtractionOutcome::failure(last_reason)
    }
}
