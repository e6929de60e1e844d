//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the crawl loop that drives work units through
//! fetch → extract → accumulate → flush:
//! - Probing the source with the first unit before starting the rest
//! - Driving each unit's pagination cursor to exhaustion
//! - Recovering from page-level failures without aborting the unit
//! - Flushing each unit's records exactly once
//! - Running units sequentially or with bounded parallelism
//! - Honoring interrupts at page boundaries

use crate::config::{Config, CrawlerConfig};
use crate::crawler::{
    build_http_client, Exhaustion, FetchRequest, HttpFetcher, PageFetcher, PaginationCursor, RateLimiter, RawPage,
    ShutdownSignal, WorkUnit,
};
use crate::extract::{Record, RecordExtractor};
use crate::output::{open_sink, CrawlReport, IncrementalSink, UnitOutcome};
use crate::sites::{self, Site};
use crate::HarvestError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Crawl loop settings
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Units crawled at once (1 = sequential)
    pub concurrency: usize,
    /// Transient failures tolerated at one cursor position
    pub max_retries: u32,
    /// Pause before retrying after a transient failure
    pub retry_delay: Duration,
    /// Matched records after which a unit stops paging
    pub target_count: Option<usize>,
}

impl CrawlOptions {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            target_count: config.target_count,
        }
    }
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_retries: 2,
            retry_delay: Duration::from_secs(5),
            target_count: None,
        }
    }
}

/// Main crawler coordinator structure
///
/// Cheap to clone: every collaborator is shared, so parallel workers each
/// hold a clone.
#[derive(Clone)]
pub struct Coordinator {
    site: Arc<dyn Site>,
    extractor: Arc<dyn RecordExtractor>,
    fetcher: Arc<dyn PageFetcher>,
    limiter: Arc<RateLimiter>,
    sink: Arc<dyn IncrementalSink>,
    options: CrawlOptions,
    shutdown: ShutdownSignal,
}

impl Coordinator {
    /// Creates a coordinator from its collaborators
    pub fn new(
        site: Arc<dyn Site>,
        extractor: Arc<dyn RecordExtractor>,
        fetcher: Arc<dyn PageFetcher>,
        limiter: Arc<RateLimiter>,
        sink: Arc<dyn IncrementalSink>,
        options: CrawlOptions,
    ) -> Self {
        Self {
            site,
            extractor,
            fetcher,
            limiter,
            sink,
            options,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Wires a coordinator for the configured source
    ///
    /// # Arguments
    ///
    /// * `config` - A validated configuration
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run
    /// * `Err(HarvestError)` - The HTTP client, site or sink could not be set up
    pub fn from_config(config: &Config) -> Result<Self, HarvestError> {
        let client = build_http_client(
            &config.user_agent,
            Duration::from_secs(config.crawler.request_timeout_secs),
        )?;
        let (site, extractor) = sites::build(config)?;
        let sink = open_sink(&config.output)?;

        Ok(Self::new(
            site,
            extractor,
            Arc::new(HttpFetcher::new(client)),
            Arc::new(RateLimiter::new(&config.rate_limit)),
            sink,
            CrawlOptions::from_config(&config.crawler),
        ))
    }

    /// Uses `shutdown` as the interrupt flag
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Runs every work unit and reports their outcomes
    ///
    /// The first unit runs alone. If it cannot reach the source at all the
    /// run is aborted; otherwise unit failures are reported, never raised.
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlReport)` - All units were attempted (or the run was interrupted)
    /// * `Err(HarvestError::SourceUnreachable)` - The probe unit never got a page
    pub async fn run(&self, units: Vec<WorkUnit>) -> Result<CrawlReport, HarvestError> {
        let started = Instant::now();
        let mut report = CrawlReport::new();
        let total = units.len();

        tracing::info!(
            "Starting crawl of {} work units (concurrency {})",
            total,
            self.options.concurrency
        );

        let mut units = units.into_iter();
        let Some(probe) = units.next() else {
            tracing::warn!("No work units to crawl");
            return Ok(report);
        };

        let outcome = self.run_guarded(probe).await;
        if let Exhaustion::RetriesExhausted(err) = &outcome.exhaustion {
            if err.is_network() && outcome.pages_fetched == 0 {
                return Err(HarvestError::SourceUnreachable(err.to_string()));
            }
        }
        report.outcomes.push(outcome);

        let rest: Vec<WorkUnit> = units.collect();
        self.run_remaining(rest, &mut report).await;

        report.interrupted = self.shutdown.is_triggered();
        report.elapsed = started.elapsed();
        report.log_summary();
        Ok(report)
    }

    async fn run_remaining(&self, units: Vec<WorkUnit>, report: &mut CrawlReport) {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut workers = JoinSet::new();
        let mut remaining = units.len();

        for unit in units {
            if self.shutdown.is_triggered() {
                break;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            // A worker may have been interrupted while we waited for the permit.
            if self.shutdown.is_triggered() {
                break;
            }

            remaining -= 1;
            let coordinator = self.clone();
            workers.spawn(async move {
                let outcome = coordinator.run_guarded(unit).await;
                drop(permit);
                outcome
            });

            while let Some(joined) = workers.try_join_next() {
                Self::collect(joined, report);
            }
        }

        while let Some(joined) = workers.join_next().await {
            Self::collect(joined, report);
        }

        if remaining > 0 {
            tracing::info!("Interrupted: {} work units not started", remaining);
        }
        report.units_not_started = remaining;
    }

    fn collect(joined: Result<UnitOutcome, tokio::task::JoinError>, report: &mut CrawlReport) {
        match joined {
            Ok(outcome) => report.outcomes.push(outcome),
            Err(err) => tracing::error!("Worker task failed: {}", err),
        }
    }

    /// Runs one unit on its own task so a panic stays at the unit boundary
    async fn run_guarded(&self, unit: WorkUnit) -> UnitOutcome {
        let unit_id = unit.id.clone();
        let label = unit.label.clone();
        let coordinator = self.clone();

        match tokio::spawn(async move { coordinator.run_unit(&unit).await }).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!("Unit {} aborted: {}", unit_id, err);
                UnitOutcome {
                    unit_id,
                    label,
                    exhaustion: Exhaustion::Failed(format!("aborted: {}", err)),
                    pages_fetched: 0,
                    pages_skipped: 0,
                    records_flushed: 0,
                    flush_error: Some("unit aborted before flush".to_string()),
                }
            }
        }
    }

    /// Drives one unit's cursor to exhaustion, then flushes its records once
    pub async fn run_unit(&self, unit: &WorkUnit) -> UnitOutcome {
        tracing::info!("Starting unit {} ({})", unit.id, unit.label);

        let mut cursor = PaginationCursor::new(
            self.site.pagination(),
            self.site.start(unit),
            unit.target_count.or(self.options.target_count),
            self.options.max_retries,
        );
        let mut records: Vec<Record> = Vec::new();

        while cursor.is_active() {
            if self.shutdown.is_triggered() {
                tracing::info!("Interrupt received, stopping unit {}", unit.id);
                cursor.interrupt();
                break;
            }

            let request = match self.site.request(unit, cursor.position()) {
                Ok(request) => request,
                Err(e) => {
                    tracing::error!("Cannot build request for {}: {}", unit.id, e);
                    cursor.fail(e.to_string());
                    break;
                }
            };

            tokio::select! {
                _ = self.limiter.admit() => {}
                _ = self.shutdown.wait() => {
                    tracing::info!("Interrupt received while waiting to fetch, stopping unit {}", unit.id);
                    cursor.interrupt();
                    break;
                }
            }

            match self.fetcher.fetch(&request).await {
                Ok(page) => self.accept_page(unit, &request, &page, &mut cursor, &mut records),
                Err(err) if err.is_rate_limited() => {
                    tracing::warn!("Throttled on {}, cooling down before retrying", request.url);
                    self.limiter.cooldown();
                }
                Err(err) => {
                    cursor.fetch_failed(&err);
                    if !cursor.is_active() {
                        tracing::warn!("Giving up on {} at {}: {}", unit.id, cursor.position(), err);
                    } else if err.is_transient() {
                        tracing::warn!(
                            "{} (attempt {}/{}), retrying in {:?}",
                            err,
                            cursor.attempts(),
                            self.options.max_retries,
                            self.options.retry_delay
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(self.options.retry_delay) => {}
                            _ = self.shutdown.wait() => {}
                        }
                    } else {
                        tracing::warn!("Skipping page of {}: {}", unit.id, err);
                    }
                }
            }
        }

        let exhaustion = cursor
            .exhaustion()
            .cloned()
            .unwrap_or(Exhaustion::Interrupted);
        if exhaustion.is_failure() {
            tracing::warn!("Unit {} ended: {}", unit.id, exhaustion);
        } else {
            tracing::info!("Unit {} ended: {}", unit.id, exhaustion);
        }

        let (records_flushed, flush_error) = match self.sink.flush(unit, &records) {
            Ok(flushed) => (flushed.rows_written, None),
            Err(e) => {
                tracing::error!("Failed to flush {} records for {}: {}", records.len(), unit.id, e);
                (0, Some(e.to_string()))
            }
        };

        UnitOutcome {
            unit_id: unit.id.clone(),
            label: unit.label.clone(),
            exhaustion,
            pages_fetched: cursor.pages_fetched(),
            pages_skipped: cursor.pages_skipped(),
            records_flushed,
            flush_error,
        }
    }

    fn accept_page(
        &self,
        unit: &WorkUnit,
        request: &FetchRequest,
        page: &RawPage,
        cursor: &mut PaginationCursor,
        records: &mut Vec<Record>,
    ) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.extractor.extract(request, page)));
        let result = match result {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(payload) => Err(format!("extractor panicked: {}", panic_message(&*payload))),
        };

        match result {
            Ok(extracted) => {
                let matched = extracted.records.len();
                tracing::debug!(
                    "{} at {}: {} items, {} records",
                    unit.id,
                    request.position,
                    extracted.item_count,
                    matched
                );
                cursor.advance(&extracted, matched);
                records.extend(extracted.records.into_iter().map(|r| r.attribute(unit)));
            }
            Err(reason) => {
                tracing::warn!("Skipping page {} of {}: {}", request.url, unit.id, reason);
                cursor.skip_page(&reason);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
