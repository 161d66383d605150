//! Extraction pipeline: share-link validation, the pluggable [`Strategy`]
//! interface and the [`ExtractionOrchestrator`] that runs strategies in
//! priority order until one yields files.
//!
//! # Architecture
//!
//! - [`TargetMatcher`] - recognizes share links and derives cache keys
//! - [`Strategy`] - async trait implemented by each way of obtaining links
//! - [`ExtractionOutcome`] - tagged result a strategy hands back
//! - [`ExtractionOrchestrator`] - admission, cache short-circuit, fallback loop
//!
//! # Example
//!
//! ```no_run
//! use sharelink_core::config::Settings;
//! use sharelink_core::build_orchestrator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = build_orchestrator(&Settings::default()).await?;
//! let extraction = orchestrator
//!     .extract("https://www.terabox.com/s/1AbCdEf", Some("user-42"))
//!     .await?;
//! for file in &extraction.files {
//!     println!("{} ({})", file.filename, file.formatted_size());
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod files;
mod orchestrator;
mod target;

pub use error::{ErrorKind, ExtractError};
pub use files::{FileDescriptor, format_duration, format_size, is_video_filename};
pub use orchestrator::{
    Extraction, ExtractionOrchestrator, OrchestratorConfig, OrchestratorStats,
};
pub use target::{
    DEFAULT_SHARE_DOMAINS, ShareTarget, TargetMatcher, compile_static_regex, extract_share_id,
    normalize_cache_key,
};

use async_trait::async_trait;

use crate::network::RequestExecutor;

/// What a strategy produced for one share link.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// Files were found.
    Success {
        files: Vec<FileDescriptor>,
        /// Name of the strategy (and sub-method) that found them.
        strategy: String,
    },
    /// Nothing usable; the orchestrator moves on to the next strategy.
    Failure { reason: String },
}

impl ExtractionOutcome {
    #[must_use]
    pub fn success(strategy: impl Into<String>, files: Vec<FileDescriptor>) -> Self {
        Self::Success {
            files,
            strategy: strategy.into(),
        }
    }

    #[must_use]
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// One way of turning a share link into file descriptors.
///
/// Strategies send all traffic through the [`RequestExecutor`] and report
/// "no result" as [`ExtractionOutcome::Failure`] instead of erroring.
///
/// # Object Safety
///
/// Uses `async_trait` so strategies can live in a `Vec<Box<dyn Strategy>>`.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Short stable name used in logs and results.
    fn name(&self) -> &str;

    /// Lower runs first. Ties keep registration order.
    fn priority(&self) -> u8;

    /// Attempts extraction. May try several sub-methods internally.
    async fn attempt(&self, target: &ShareTarget, executor: &RequestExecutor) -> ExtractionOutcome;
}
