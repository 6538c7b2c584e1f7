//! Citation collection.
//!
//! Citations are derived exclusively from agent tool output (search, fetch,
//! crawl) with a plain-text fallback, then normalized, scored, deduped,
//! diversity-capped and ranked. Nothing here is user-supplied.

pub mod collector;
pub mod credibility;
pub mod extract;
pub mod pollution;
pub mod score;
pub mod url;

pub use collector::{CitationCollector, filter_fetch_only_and_assign_ids};
pub use credibility::CredibilityConfig;
