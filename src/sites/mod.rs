//! Site request planners
//!
//! A [`Site`] turns a work unit and a cursor position into the next
//! [`FetchRequest`]. It owns URL layout and query parameters only; parsing
//! the response is the paired [`RecordExtractor`]'s job. [`build`] returns
//! the planner and extractor for the configured source.

use crate::config::{Config, SourceKind};
use crate::crawler::{CursorPosition, FetchRequest, Pagination, WorkUnit};
use crate::extract::{PullPushExtractor, RecordExtractor, TableExtractor, TablePick};
use crate::{ConfigError, HarvestError};
use chrono::Utc;
use std::sync::Arc;
use url::Url;

const PULLPUSH_URL: &str = "https://api.pullpush.io/reddit/search/submission";
const DATAROMA_URL: &str = "https://www.dataroma.com/m/";
const WHALEWISDOM_URL: &str = "https://whalewisdom.com/";

/// Rows kept per WhaleWisdom holdings table unless configured otherwise
pub const DEFAULT_TOP_ROWS: usize = 20;

/// Builds requests for one source
pub trait Site: Send + Sync {
    /// How the source pages through a unit
    fn pagination(&self) -> Pagination;

    /// The unit's first cursor position
    fn start(&self, unit: &WorkUnit) -> CursorPosition;

    /// Builds the request for `position` within `unit`
    ///
    /// # Returns
    ///
    /// * `Ok(FetchRequest)` - The request to fetch
    /// * `Err(HarvestError)` - The position cannot be expressed for this site
    fn request(&self, unit: &WorkUnit, position: &CursorPosition) -> Result<FetchRequest, HarvestError>;
}

fn request_error(unit: &WorkUnit, message: impl Into<String>) -> HarvestError {
    HarvestError::Request {
        unit: unit.id.clone(),
        message: message.into(),
    }
}

/// Parses a base URL so relative paths join beneath it
fn directory_url(base: &str) -> Result<Url, HarvestError> {
    if base.ends_with('/') {
        Ok(Url::parse(base)?)
    } else {
        Ok(Url::parse(&format!("{}/", base))?)
    }
}

/// PullPush submission search, paged backwards by `created_utc`
#[derive(Debug, Clone)]
pub struct PullPushSite {
    endpoint: Url,
    sort_type: String,
    page_size: u32,
}

impl PullPushSite {
    pub fn new(endpoint: Url, sort_type: impl Into<String>, page_size: u32) -> Self {
        Self {
            endpoint,
            sort_type: sort_type.into(),
            page_size,
        }
    }
}

impl Site for PullPushSite {
    fn pagination(&self) -> Pagination {
        Pagination::Before
    }

    fn start(&self, unit: &WorkUnit) -> CursorPosition {
        let end = unit
            .window
            .map(|w| w.end_timestamp())
            .unwrap_or_else(|| Utc::now().timestamp());
        CursorPosition::Before(end)
    }

    fn request(&self, unit: &WorkUnit, position: &CursorPosition) -> Result<FetchRequest, HarvestError> {
        let before = match position {
            CursorPosition::Before(ts) => *ts,
            CursorPosition::Start => match self.start(unit) {
                CursorPosition::Before(ts) => ts,
                _ => return Err(request_error(unit, "no starting timestamp")),
            },
            CursorPosition::Follow(key) => {
                return Err(request_error(unit, format!("unexpected follow-up key {}", key)))
            }
        };

        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("subreddit", &unit.target_id);
            if let Some(window) = &unit.window {
                query.append_pair("after", &window.start_timestamp().to_string());
            }
            query
                .append_pair("before", &before.to_string())
                .append_pair("sort", "desc")
                .append_pair("sort_type", &self.sort_type)
                .append_pair("size", &self.page_size.to_string());
        }

        Ok(FetchRequest {
            unit_id: unit.id.clone(),
            url,
            position: position.clone(),
        })
    }
}

/// Dataroma quarterly portfolio page, one per manager and quarter
#[derive(Debug, Clone)]
pub struct DataromaHoldingsSite {
    base: Url,
}

impl DataromaHoldingsSite {
    pub fn new(base: Url) -> Self {
        Self { base }
    }
}

impl Site for DataromaHoldingsSite {
    fn pagination(&self) -> Pagination {
        Pagination::Single
    }

    fn start(&self, _unit: &WorkUnit) -> CursorPosition {
        CursorPosition::Start
    }

    fn request(&self, unit: &WorkUnit, position: &CursorPosition) -> Result<FetchRequest, HarvestError> {
        let mut url = self.base.join("holdings.php")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("m", &unit.target_id);
            if let Some(window) = &unit.window {
                query.append_pair("p", &window.period_end());
            }
        }

        Ok(FetchRequest {
            unit_id: unit.id.clone(),
            url,
            position: position.clone(),
        })
    }
}

/// Dataroma per-ticker history, discovered from a manager's activity page
#[derive(Debug, Clone)]
pub struct DataromaHistorySite {
    base: Url,
}

impl DataromaHistorySite {
    pub fn new(base: Url) -> Self {
        Self { base }
    }
}

impl Site for DataromaHistorySite {
    fn pagination(&self) -> Pagination {
        Pagination::Queue
    }

    fn start(&self, _unit: &WorkUnit) -> CursorPosition {
        CursorPosition::Start
    }

    fn request(&self, unit: &WorkUnit, position: &CursorPosition) -> Result<FetchRequest, HarvestError> {
        let url = match position {
            CursorPosition::Start => {
                let mut url = self.base.join("m_activity.php")?;
                url.query_pairs_mut()
                    .append_pair("m", &unit.target_id)
                    .append_pair("typ", "a");
                url
            }
            CursorPosition::Follow(ticker) => {
                let mut url = self.base.join("hist/hist.php")?;
                url.query_pairs_mut()
                    .append_pair("f", &unit.target_id)
                    .append_pair("s", ticker);
                url
            }
            CursorPosition::Before(ts) => {
                return Err(request_error(unit, format!("unexpected timestamp position {}", ts)))
            }
        };

        Ok(FetchRequest {
            unit_id: unit.id.clone(),
            url,
            position: position.clone(),
        })
    }
}

/// Dataroma manager performance page, one per manager
#[derive(Debug, Clone)]
pub struct DataromaPerformanceSite {
    base: Url,
}

impl DataromaPerformanceSite {
    pub fn new(base: Url) -> Self {
        Self { base }
    }
}

impl Site for DataromaPerformanceSite {
    fn pagination(&self) -> Pagination {
        Pagination::Single
    }

    fn start(&self, _unit: &WorkUnit) -> CursorPosition {
        CursorPosition::Start
    }

    fn request(&self, unit: &WorkUnit, position: &CursorPosition) -> Result<FetchRequest, HarvestError> {
        let mut url = self.base.join("perf.php")?;
        url.query_pairs_mut().append_pair("m", &unit.target_id);
        Ok(FetchRequest {
            unit_id: unit.id.clone(),
            url,
            position: position.clone(),
        })
    }
}

/// WhaleWisdom filer page
#[derive(Debug, Clone)]
pub struct WhaleWisdomSite {
    base: Url,
}

impl WhaleWisdomSite {
    pub fn new(base: Url) -> Self {
        Self { base }
    }
}

impl Site for WhaleWisdomSite {
    fn pagination(&self) -> Pagination {
        Pagination::Single
    }

    fn start(&self, _unit: &WorkUnit) -> CursorPosition {
        CursorPosition::Start
    }

    fn request(&self, unit: &WorkUnit, position: &CursorPosition) -> Result<FetchRequest, HarvestError> {
        let url = self.base.join(&format!("filer/{}", unit.target_id))?;
        Ok(FetchRequest {
            unit_id: unit.id.clone(),
            url,
            position: position.clone(),
        })
    }
}

/// Builds the request planner and record extractor for the configured source
///
/// # Arguments
///
/// * `config` - A validated configuration
///
/// # Returns
///
/// * `Ok((site, extractor))` - The pair driving this source
/// * `Err(HarvestError)` - A base URL or ticker pattern is invalid
pub fn build(config: &Config) -> Result<(Arc<dyn Site>, Arc<dyn RecordExtractor>), HarvestError> {
    let source = &config.source;
    let base = source.base_url.as_deref();

    let pair: (Arc<dyn Site>, Arc<dyn RecordExtractor>) = match config.crawler.source {
        SourceKind::Pullpush => {
            let endpoint = Url::parse(base.unwrap_or(PULLPUSH_URL))?;
            let site = PullPushSite::new(
                endpoint,
                source.sort_type.as_deref().unwrap_or("created_utc"),
                source.page_size.unwrap_or(100),
            );
            let extractor = PullPushExtractor::new(
                &source.tickers,
                source
                    .selftext_limit
                    .unwrap_or(crate::extract::DEFAULT_SELFTEXT_LIMIT),
            )
            .map_err(|e| ConfigError::Validation(format!("invalid ticker pattern: {}", e)))?;
            (Arc::new(site), Arc::new(extractor))
        }
        SourceKind::DataromaHoldings => {
            let site = DataromaHoldingsSite::new(directory_url(base.unwrap_or(DATAROMA_URL))?);
            let extractor = TableExtractor::new(TablePick::First)
                .within("#grid")
                .rename_columns(&["Stock_Name", "Ticker", "Weight_Pct", "Shares", "Price", "Value"])
                .numeric(&["Weight_Pct", "Shares", "Value"])
                .max_rows(source.top_rows)
                .allow_missing();
            (Arc::new(site), Arc::new(extractor))
        }
        SourceKind::DataromaHistory => {
            let site = DataromaHistorySite::new(directory_url(base.unwrap_or(DATAROMA_URL))?);
            let extractor = TableExtractor::new(TablePick::Longest)
                .min_rows(2)
                .max_rows(source.top_rows)
                .follow_links("a[href]", &["sym", "s"])
                .key_column("Ticker");
            (Arc::new(site), Arc::new(extractor))
        }
        SourceKind::DataromaPerformance => {
            let site = DataromaPerformanceSite::new(directory_url(base.unwrap_or(DATAROMA_URL))?);
            let extractor = TableExtractor::new(TablePick::First)
                .max_rows(source.top_rows)
                .allow_missing();
            (Arc::new(site), Arc::new(extractor))
        }
        SourceKind::Whalewisdom => {
            let site = WhaleWisdomSite::new(directory_url(base.unwrap_or(WHALEWISDOM_URL))?);
            let extractor = TableExtractor::new(TablePick::First)
                .within("#holdings_table")
                .drop_empty_columns()
                .max_rows(Some(source.top_rows.unwrap_or(DEFAULT_TOP_ROWS)));
            (Arc::new(site), Arc::new(extractor))
        }
    };

    Ok(pair)
}
