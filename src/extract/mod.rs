//! Record extraction
//!
//! This module turns raw page content into normalized [`Record`]s:
//! - The [`RecordExtractor`] trait consumed by the crawl coordinator
//! - An HTML table extractor for the 13F aggregator sites
//! - A JSON extractor for the PullPush submission search API

mod pullpush;
mod record;
mod table;

pub use pullpush::{find_tickers, PullPushExtractor, DEFAULT_SELFTEXT_LIMIT};
pub use record::{Record, UNIT_ID_COLUMN};
pub use table::{clean_number, parse_tables, HtmlTable, TableExtractor, TablePick};

use crate::crawler::{FetchRequest, RawPage};
use thiserror::Error;

/// Errors raised while turning a page into records
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("No usable table: {0}")]
    NoTable(String),

    #[error("Malformed content: {0}")]
    Malformed(String),
}

/// Everything the cursor and the accumulator need from one page
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    /// Normalized rows, without provenance
    pub records: Vec<Record>,

    /// Source items seen on the page, matched or not
    ///
    /// Zero means the source has run dry for the unit.
    pub item_count: usize,

    /// Position markers of the page's items (e.g. creation timestamps)
    pub markers: Vec<i64>,

    /// Keys of further pages discovered on this page
    pub follow_ups: Vec<String>,
}

impl ExtractedPage {
    /// A page whose items are exactly its records
    pub fn from_records(records: Vec<Record>) -> Self {
        Self {
            item_count: records.len(),
            records,
            ..Self::default()
        }
    }

    /// A page containing nothing
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Turns raw page content into records
///
/// Implementations are pure functions of their input and hold no crawl
/// state, so a single extractor is shared by every concurrent unit.
pub trait RecordExtractor: Send + Sync {
    /// Extracts records from one fetched page
    ///
    /// # Arguments
    ///
    /// * `request` - The request that produced the page (its cursor position
    ///   tells multi-kind sources which page type this is)
    /// * `page` - The fetched content
    fn extract(&self, request: &FetchRequest, page: &RawPage) -> Result<ExtractedPage, ExtractError>;
}
