//! Strategy that asks third-party relay services to resolve the link.
//!
//! Relays are called directly, without pooled proxies or identities, since
//! they are not the share service and do their own fetching.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::listing::{json_u64, parse_file_list};
use crate::extractor::{ExtractionOutcome, FileDescriptor, ShareTarget, Strategy};
use crate::network::{RequestExecutor, RequestSpec};

const STRATEGY_NAME: &str = "relay";
const PRIORITY: u8 = 4;

/// Relay endpoints used when none are configured.
pub const DEFAULT_RELAY_ENDPOINTS: [&str; 2] = [
    "https://teraboxdownloader.online/api/get-download",
    "https://teradownloader.com/api/extract",
];

/// Interprets the response shapes relays are known to return:
///
/// - `{"success": true, "data": {"files" | "list": [...]}}`
/// - `{"status": "success", "result": {"files" | "list": [...]}}`
/// - `{"download_url": "...", "filename": "...", "size": N}` for a single file
#[must_use]
pub fn parse_relay_response(data: &Value) -> Vec<FileDescriptor> {
    let envelope = if data.get("success").and_then(Value::as_bool) == Some(true) {
        data.get("data")
    } else if data.get("status").and_then(Value::as_str) == Some("success") {
        data.get("result")
    } else {
        None
    };

    if let Some(envelope) = envelope {
        let list = envelope.get("files").or_else(|| envelope.get("list"));
        return list.map(parse_file_list).unwrap_or_default();
    }

    match data.get("download_url").and_then(Value::as_str) {
        Some(link) if !link.trim().is_empty() => {
            let filename = data
                .get("filename")
                .and_then(Value::as_str)
                .unwrap_or("Unknown");
            let mut file = FileDescriptor::new(filename, json_u64(data.get("size")).unwrap_or(0), link.trim());
            // Single-file relays only serve media.
            file.is_video = true;
            vec![file]
        }
        _ => Vec::new(),
    }
}

/// POSTs the share link to each relay endpoint in order.
pub struct RelayStrategy {
    endpoints: Vec<String>,
}

impl Default for RelayStrategy {
    fn default() -> Self {
        Self::with_endpoints(DEFAULT_RELAY_ENDPOINTS)
    }
}

impl RelayStrategy {
    #[must_use]
    pub fn with_endpoints<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            endpoints: endpoints
                .into_iter()
                .map(|endpoint| endpoint.as_ref().trim().to_string())
                .filter(|endpoint| !endpoint.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }
}

impl std::fmt::Debug for RelayStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayStrategy")
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

#[async_trait]
impl Strategy for RelayStrategy {
    fn name(&self) -> &str {
        STRATEGY_NAME
    }

    fn priority(&self) -> u8 {
        PRIORITY
    }

    #[instrument(skip(self, target, executor), fields(strategy = STRATEGY_NAME, url = %target.url()))]
    async fn attempt(&self, target: &ShareTarget, executor: &RequestExecutor) -> ExtractionOutcome {
        let mut last_reason = String::from("no relay endpoints configured");
        for endpoint in &self.endpoints {
            let request = RequestSpec::post_json(endpoint.as_str(), json!({ "url": target.url() }))
                .header("Accept", "application/json")
                .direct();
            let data = match executor.execute(&request).await {
                Ok(response) => response.payload.to_json(),
                Err(error) => {
                    debug!(endpoint = %endpoint, error = %error, "relay request failed");
                    last_reason = format!("{endpoint}: {error}");
                    continue;
                }
            };

            let files = data.as_ref().map(parse_relay_response).unwrap_or_default();
            if files.is_empty() {
                debug!(endpoint = %endpoint, "relay returned no files");
                last_reason = format!("{endpoint}: no files in response");
                continue;
            }
            return ExtractionOutcome::success(format!("{STRATEGY_NAME}:{endpoint}"), files);
        }
        ExtractionOutcome::failure(last_reason)
    }
}
