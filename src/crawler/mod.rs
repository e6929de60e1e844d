//! Crawler module for paginated, rate-limited harvesting
//!
//! This module contains the reusable crawl core, including:
//! - Work unit planning (targets × calendar quarters)
//! - A sliding-window rate limiter with throttling cooldown
//! - The pagination cursor and its exhaustion rules
//! - The page fetcher seam and its HTTP implementation
//! - Overall crawl coordination

mod coordinator;
mod cursor;
mod fetcher;
mod rate_limiter;
mod shutdown;
mod work_unit;

pub use coordinator::{Coordinator, CrawlOptions};
pub use cursor::{CursorPosition, CursorState, Exhaustion, Pagination, PaginationCursor};
pub use fetcher::{build_http_client, FetchError, FetchRequest, HttpFetcher, PageFetcher, RawPage};
pub use rate_limiter::RateLimiter;
pub use shutdown::ShutdownSignal;
pub use work_unit::{plan_work_units, quarters, TimeWindow, WorkUnit};

use crate::config::Config;
use crate::output::CrawlReport;
use crate::HarvestError;
use chrono::Utc;

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Plan the work units
/// 2. Build the HTTP client, site planner, extractor and sink
/// 3. Crawl every unit, flushing each one as it finishes
/// 4. Return the run report
///
/// # Arguments
///
/// * `config` - A validated configuration
/// * `shutdown` - Interrupt flag honored at page boundaries
///
/// # Returns
///
/// * `Ok(CrawlReport)` - Crawl completed, possibly with failed units
/// * `Err(HarvestError)` - Setup failed or the source was unreachable
pub async fn crawl(config: &Config, shutdown: ShutdownSignal) -> Result<CrawlReport, HarvestError> {
    let units = plan_work_units(config, Utc::now());
    let coordinator = Coordinator::from_config(config)?.with_shutdown(shutdown);
    coordinator.run(units).await
}
