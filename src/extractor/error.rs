//! Error types for extraction.
//!
//! Only failures the orchestrator cannot recover from surface here; transient
//! network trouble is retried by the executor and strategy failures are
//! absorbed by the fallback loop.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::network::{RateLimitExceeded, RequestError};

/// Error taxonomy shared by the whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The caller supplied something that is not a recognized share link.
    InvalidInput,
    /// Admission was refused; retry after a pause.
    RateLimited,
    /// Network failures, retried inside the executor up to its cap.
    TransientNetwork,
    /// Every strategy failed; the resource is probably unavailable.
    StrategyExhausted,
    /// Proxy or identity infrastructure is unusable; requests degrade to direct.
    InfrastructureDegraded,
}

impl ErrorKind {
    /// Whether the caller may retry the same request later.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::InvalidInput)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::RateLimited => "rate_limited",
            Self::TransientNetwork => "transient_network",
            Self::StrategyExhausted => "strategy_exhausted",
            Self::InfrastructureDegraded => "infrastructure_degraded",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&RequestError> for ErrorKind {
    fn from(error: &RequestError) -> Self {
        match error {
            RequestError::InvalidUrl { .. } => Self::InvalidInput,
            RequestError::ClientBuild { .. } => Self::InfrastructureDegraded,
            RequestError::RetriesExhausted { .. } => Self::TransientNetwork,
        }
    }
}

/// Terminal extraction failures returned to the caller.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// The input is not a recognized share link.
    #[error("invalid share link '{input}': {reason}\n  Suggestion: {suggestion}")]
    InvalidInput {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
        /// How to fix it.
        suggestion: String,
    },

    /// The rate limiter did not admit the request in time.
    #[error(
        "rate limit exceeded for {caller} after waiting {waited:?}\n  Suggestion: Wait a moment before sending more links"
    )]
    RateLimited {
        /// Caller id, or `global`.
        caller: String,
        /// How long admission was attempted.
        waited: Duration,
    },

    /// No strategy produced files.
    #[error(
        "could not extract '{input}' after trying {tried} strategy(ies): {last_error}\n  Suggestion: The link may be private, expired or removed; try again later"
    )]
    StrategyExhausted {
        /// The share link.
        input: String,
        /// Strategies invoked.
        tried: usize,
        /// Failure reported by the last strategy.
        last_error: String,
    },

    /// The overall extraction deadline elapsed mid-loop.
    #[error(
        "extraction of '{input}' exceeded its {deadline:?} deadline after {tried} strategy(ies)\n  Suggestion: Try again later or raise EXTRACTION_DEADLINE_SECS"
    )]
    DeadlineExceeded {
        /// The share link.
        input: String,
        /// Configured deadline.
        deadline: Duration,
        /// Strategies started before the deadline hit.
        tried: usize,
    },
}

impl ExtractError {
    /// Creates an `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(input: &str, reason: &str) -> Self {
        Self::InvalidInput {
            input: input.to_string(),
            reason: reason.to_string(),
            suggestion: "Send a share link such as https://www.terabox.com/s/1AbCdEf".to_string(),
        }
    }

    /// Creates a `StrategyExhausted` error.
    #[must_use]
    pub fn strategy_exhausted(input: &str, tried: usize, last_error: Option<String>) -> Self {
        Self::StrategyExhausted {
            input: input.to_string(),
            tried,
            last_error: last_error.unwrap_or_else(|| "no strategy produced files".to_string()),
        }
    }

    /// Creates a `DeadlineExceeded` error.
    #[must_use]
    pub fn deadline_exceeded(input: &str, deadline: Duration, tried: usize) -> Self {
        Self::DeadlineExceeded {
            input: input.to_string(),
            deadline,
            tried,
        }
    }

    /// Maps the error onto the pipeline taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::StrategyExhausted { .. } | Self::DeadlineExceeded { .. } => {
                ErrorKind::StrategyExhausted
            }
        }
    }

    /// Whether the caller may retry later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<RateLimitExceeded> for ExtractError {
    fn from(error: RateLimitExceeded) -> Self {
        Self::RateLimited {
            caller: error.caller,
            waited: error.waited,
        }
    }
}
