//! Error types for the network module.
//!
//! [`RequestError`] is what callers of the request executor see. [`AttemptError`]
//! describes why a single attempt failed and feeds retry classification; it only
//! escapes the executor as the `reason` of [`RequestError::RetriesExhausted`].

use thiserror::Error;

/// Terminal errors returned by the request executor.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The provided URL is malformed or uses an unsupported scheme.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// An HTTP client could not be constructed (usually a malformed proxy address).
    #[error("failed to build HTTP client via {route}: {reason}")]
    ClientBuild {
        /// `direct` or the proxy address the client was built for.
        route: String,
        /// Why construction failed.
        reason: String,
    },

    /// Every attempt failed and the retry budget is spent.
    #[error(
        "request to {url} failed after {attempts} attempt(s): {reason}\n  Suggestion: {suggestion}"
    )]
    RetriesExhausted {
        /// The URL that could not be fetched.
        url: String,
        /// Total attempts made, including the first.
        attempts: u32,
        /// HTTP status of the last attempt, when the server answered at all.
        last_status: Option<u16>,
        /// Description of the last attempt's failure.
        reason: String,
        /// User-facing hint.
        suggestion: &'static str,
    },
}

impl RequestError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a client construction error.
    pub fn client_build(route: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ClientBuild {
            route: route.into(),
            reason: reason.into(),
        }
    }

    /// Creates a retries-exhausted error from the last attempt's failure.
    ///
    /// The suggestion is derived from the last failure: persistent 429s point at
    /// request volume, everything else at upstream availability.
    pub fn retries_exhausted(url: impl Into<String>, attempts: u32, last: &AttemptError) -> Self {
        let last_status = last.status();
        let suggestion = match last_status {
            Some(429) => "The service is rate limiting this client; wait before retrying",
            Some(401 | 403) => "The service rejected the client identity; retry later",
            _ => "The service or the network path is unavailable; retry later",
        };
        Self::RetriesExhausted {
            url: url.into(),
            attempts,
            last_status,
            reason: last.to_string(),
            suggestion,
        }
    }

    /// Returns the HTTP status of the final attempt, if any.
    #[must_use]
    pub fn last_status(&self) -> Option<u16> {
        match self {
            Self::RetriesExhausted { last_status, .. } => *last_status,
            _ => None,
        }
    }
}

/// Why a single attempt failed.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// Raw Retry-After header value, if the server sent one.
        retry_after: Option<String>,
    },

    /// Connect or read timeout elapsed.
    #[error("timed out")]
    Timeout,

    /// DNS, connection, TLS or proxy tunnel failure.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The response body could not be read or decoded.
    #[error("unreadable response body: {0}")]
    Body(#[source] reqwest::Error),
}

impl AttemptError {
    /// Builds the attempt error for a failed `send()`.
    pub(crate) fn from_send(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(error)
        }
    }

    /// Builds the attempt error for a failed body read.
    pub(crate) fn from_body(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Body(error)
        }
    }

    /// Returns the HTTP status for status failures.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
