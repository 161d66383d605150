//! Concrete extraction strategies.
//!
//! # Architecture
//!
//! | Strategy | Priority | Route |
//! |----------|----------|-------|
//! | [`ShareApiStrategy`] | 1 | share API on each mirror origin, pooled proxy and identity |
//! | [`PageScrapeStrategy`] | 3 | share page HTML, pooled proxy and identity |
//! | [`RelayStrategy`] | 4 | third-party relay POST, direct |
//! | [`BypassStrategy`] | 5 | mobile, app and WAP client requests on the first API origin |
//!
//! All of them turn service listings into
//! [`FileDescriptor`](crate::extractor::FileDescriptor)s through the shared
//! [`listing`] parser.

mod bypass;
pub mod listing;
mod page_scrape;
mod relay;
mod share_api;

pub use bypass::{BypassStrategy, DEFAULT_BYPASS_BASE, app_sign};
pub use page_scrape::{DEFAULT_PAGE_BASES, PageScrapeStrategy, extract_from_html};
pub use relay::{DEFAULT_RELAY_ENDPOINTS, RelayStrategy, parse_relay_response};
pub use share_api::{DEFAULT_API_BASES, ShareApiStrategy};

use crate::config::Settings;
use crate::extractor::Strategy;

/// The built-in strategies configured from `settings`.
#[must_use]
pub fn default_strategies(settings: &Settings) -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(ShareApiStrategy::with_api_bases(&settings.api_bases)),
        Box::new(PageScrapeStrategy::with_page_bases(&settings.page_bases)),
        Box::new(RelayStrategy::with_endpoints(&settings.relay_endpoints)),
        Box::new(BypassStrategy::with_base(
            settings
                .api_bases
                .first()
                .map_or(DEFAULT_BYPASS_BASE, String::as_str),
        )),
    ]
}
