//! The single choke point for outbound share-service requests.
//!
//! [`RequestExecutor::execute`] runs one logical request: per attempt it picks
//! an identity and a proxy, sends the call with browser headers and bounded
//! timeouts, classifies the outcome, reports it back to the pools, and backs
//! off before retrying. Strategies never talk to reqwest directly, so proxy
//! and identity feedback and retry policy are uniform across all of them.
//!
//! # Outcome handling
//!
//! | Outcome | Proxy | Identity | Retried |
//! |---------|-------|----------|---------|
//! | 2xx | success + latency | success | no |
//! | 429 | - | - | yes, `Retry-After` may lengthen the delay |
//!
//! Delays between attempts of one request strictly increase, even when the
//! server keeps sending the same `Retry-After`.
//! | 401, 403 | failure | failure | yes |
//! | other status, timeout, transport | failure | - | yes |

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

use super::client::{ClientCache, HttpTimeouts};
use super::error::{AttemptError, RequestError};
use super::headers::{browser_headers, insert_header, random_browser_user_agent};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_attempt, parse_retry_after};
use crate::pool::{IdentityPool, IssuedIdentity, ProxyPool};

/// Smallest gap between successive delays when the base delay is zero.
const MIN_DELAY_STEP: Duration = Duration::from_millis(1);

/// Request body variants.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON with `Content-Type: application/json`.
    Json(Value),
    /// URL-encoded with `Content-Type: application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
}

/// One logical request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub url: String,
    pub method: Method,
    /// Extra headers; these override the defaults.
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    /// Route through the proxy pool when an endpoint is available.
    pub use_proxy: bool,
    /// Present a pooled identity (cookie and User-Agent).
    pub use_identity: bool,
}

impl RequestSpec {
    /// A GET with proxy and identity enabled.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: Vec::new(),
            body: None,
            use_proxy: true,
            use_identity: true,
        }
    }

    /// A POST carrying a JSON body.
    #[must_use]
    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(RequestBody::Json(body)),
            ..Self::get(url)
        }
    }

    /// A POST carrying a form body.
    #[must_use]
    pub fn post_form(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::POST,
            body: Some(RequestBody::Form(fields)),
            ..Self::get(url)
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Skips the proxy pool and the identity pool.
    #[must_use]
    pub fn direct(mut self) -> Self {
        self.use_proxy = false;
        self.use_identity = false;
        self
    }

    #[must_use]
    pub fn without_proxy(mut self) -> Self {
        self.use_proxy = false;
        self
    }

    #[must_use]
    pub fn without_identity(mut self) -> Self {
        self.use_identity = false;
        self
    }
}

/// Parsed response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The response declared a JSON content type and parsed as JSON.
    Json(Value),
    /// Anything else, as text.
    Text(String),
}

impl Payload {
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(_) => None,
        }
    }

    /// Parses text payloads as JSON too (some services mislabel JSON).
    #[must_use]
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value.clone()),
            Self::Text(text) => serde_json::from_str(text).ok(),
        }
    }
}

/// A successful response.
#[derive(Debug, Clone)]
pub struct ExecutorResponse {
    pub status: u16,
    pub payload: Payload,
    /// Latency of the successful attempt.
    pub latency: Duration,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Proxy that carried the successful attempt.
    pub proxy: Option<String>,
}

/// Issues requests through the proxy and identity pools with retry/backoff.
///
/// Cheap to share behind `Arc`; clients are cached per route.
#[derive(Debug)]
pub struct RequestExecutor {
    proxies: Arc<ProxyPool>,
    identities: Arc<IdentityPool>,
    retry: RetryPolicy,
    clients: ClientCache,
}

impl RequestExecutor {
    /// Creates an executor over shared pools.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::ClientBuild`] if the direct client cannot be built.
    pub fn new(
        proxies: Arc<ProxyPool>,
        identities: Arc<IdentityPool>,
        retry: RetryPolicy,
        timeouts: HttpTimeouts,
    ) -> Result<Self, RequestError> {
        Ok(Self {
            proxies,
            identities,
            retry,
            clients: ClientCache::new(timeouts)?,
        })
    }

    /// An executor with proxies disabled and a default identity pool.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::ClientBuild`] if the direct client cannot be built.
    pub fn without_proxies(retry: RetryPolicy, timeouts: HttpTimeouts) -> Result<Self, RequestError> {
        Self::new(
            Arc::new(ProxyPool::disabled()),
            Arc::new(IdentityPool::default()),
            retry,
            timeouts,
        )
    }

    #[must_use]
    pub fn proxies(&self) -> &Arc<ProxyPool> {
        &self.proxies
    }

    #[must_use]
    pub fn identities(&self) -> &Arc<IdentityPool> {
        &self.identities
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Executes `request`, retrying failed attempts per the retry policy.
    ///
    /// # Errors
    ///
    /// - [`RequestError::InvalidUrl`] for unparseable or non-HTTP URLs (no attempt made)
    /// - [`RequestError::RetriesExhausted`] once `max_retries + 1` attempts failed
    #[instrument(skip(self, request), fields(url = %request.url, method = %request.method))]
    pub async fn execute(&self, request: &RequestSpec) -> Result<ExecutorResponse, RequestError> {
        let destination = destination_host(&request.url)?;
        let mut attempt: u32 = 0;
        let mut previous_delay: Option<Duration> = None;

        loop {
            let identity = if request.use_identity {
                Some(self.identities.next().await)
            } else {
                None
            };
            let (client, proxy) = self.route(request.use_proxy, &destination).await;

            let started = Instant::now();
            let outcome = send_once(&client, request, identity.as_ref()).await;
            let latency = started.elapsed();

            let error = match outcome {
                Ok((status, payload)) => {
                    if let Some(proxy) = &proxy {
                        self.proxies.report_success(proxy, latency).await;
                    }
                    if let Some(identity) = &identity {
                        self.identities.report_success(identity.id).await;
                    }
                    debug!(
                        status,
                        attempts = attempt + 1,
                        latency_ms = latency.as_millis(),
                        "request succeeded"
                    );
                    return Ok(ExecutorResponse {
                        status,
                        payload,
                        latency,
                        attempts: attempt + 1,
                        proxy,
                    });
                }
                Err(error) => error,
            };

            let failure = classify_attempt(&error);
            if failure.blames_proxy()
                && let Some(proxy) = &proxy
            {
                self.proxies.report_failure(proxy).await;
            }
            if failure.blames_identity()
                && let Some(identity) = &identity
            {
                self.identities.report_failure(identity.id).await;
            }

            match self.retry.should_retry(failure, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    let delay = spaced_delay(
                        lengthen_for_retry_after(delay, failure, &error),
                        previous_delay,
                        self.retry.base_delay(),
                    );
                    previous_delay = Some(delay);
                    debug!(
                        error = %error,
                        ?failure,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        proxy = proxy.as_deref().unwrap_or("direct"),
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next_attempt;
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(error = %error, attempts = attempt + 1, reason = %reason, "request failed");
                    return Err(RequestError::retries_exhausted(
                        request.url.clone(),
                        attempt + 1,
                        &error,
                    ));
                }
            }
        }
    }

    /// Picks the client for one attempt, falling back to direct when the
    /// proxy pool has nothing to offer.
    async fn route(&self, use_proxy: bool, destination: &str) -> (Client, Option<String>) {
        if !use_proxy {
            return (self.clients.direct().clone(), None);
        }
        let Some(proxy) = self.proxies.select(destination).await else {
            if self.proxies.is_enabled() {
                debug!(destination, "no proxy available, going direct");
            }
            return (self.clients.direct().clone(), None);
        };
        match self.clients.for_proxy(&proxy) {
            Ok(client) => (client, Some(proxy)),
            Err(_) => {
                self.proxies.report_failure(&proxy).await;
                (self.clients.direct().clone(), None)
            }
        }
    }
}

/// Lower-cased host of `url` with any leading `www.` removed.
fn destination_host(url: &str) -> Result<String, RequestError> {
    let parsed = Url::parse(url).map_err(|_| RequestError::invalid_url(url))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(RequestError::invalid_url(url));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| RequestError::invalid_url(url))?
        .to_ascii_lowercase();
    Ok(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

fn lengthen_for_retry_after(delay: Duration, failure: FailureType, error: &AttemptError) -> Duration {
    if failure != FailureType::RateLimited {
        return delay;
    }
    match error {
        AttemptError::Status {
            retry_after: Some(value),
            ..
        } => parse_retry_after(value).map_or(delay, |requested| delay.max(requested)),
        _ => delay,
    }
}

/// Raises `delay` to at least `previous + step`.
fn spaced_delay(delay: Duration, previous: Option<Duration>, step: Duration) -> Duration {
    match previous {
        Some(previous) => delay.max(previous.saturating_add(step.max(MIN_DELAY_STEP))),
        None => delay,
    }
}

fn encode_form(fields: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish()
}

async fn send_once(
    client: &Client,
    request: &RequestSpec,
    identity: Option<&IssuedIdentity>,
) -> Result<(u16, Payload), AttemptError> {
    let user_agent = match identity {
        Some(identity) => identity.user_agent.as_str(),
        None => random_browser_user_agent(),
    };
    let mut headers = browser_headers(user_agent);
    if let Some(identity) = identity {
        insert_header(&mut headers, COOKIE.as_str(), &identity.cookie);
    }

    let mut builder = client.request(request.method.clone(), &request.url);
    match &request.body {
        Some(RequestBody::Json(value)) => builder = builder.json(value),
        Some(RequestBody::Form(fields)) => {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );
            builder = builder.body(encode_form(fields));
        }
        None => {}
    }
    for (name, value) in &request.headers {
        insert_header(&mut headers, name, value);
    }

    let response = builder
        .headers(headers)
        .send()
        .await
        .map_err(AttemptError::from_send)?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        return Err(AttemptError::Status {
            status: status.as_u16(),
            retry_after,
        });
    }

    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| {
            let content_type = content_type.to_ascii_lowercase();
            content_type.contains("application/json") || content_type.contains("+json")
        });

    let text = response.text().await.map_err(AttemptError::from_body)?;
    let payload = if is_json {
        match serde_json::from_str(&text) {
            Ok(value) => Payload::Json(value),
            Err(error) => {
                debug!(error = %error, "declared JSON body did not parse, keeping text");
                Payload::Text(text)
            }
        }
    } else {
        Payload::Text(text)
    };

    Ok((status.as_u16(), payload))
}
