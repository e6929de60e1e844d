//! Run report
//!
//! Collects the outcome of every work unit and renders the end-of-run
//! summary: units completed, units failed, skipped pages, and rows written.

use crate::crawler::Exhaustion;
use std::time::Duration;

/// How one work unit ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    pub unit_id: String,
    pub label: String,
    pub exhaustion: Exhaustion,
    pub pages_fetched: usize,
    pub pages_skipped: usize,
    /// Rows the sink accepted for the unit
    pub records_flushed: usize,
    /// Set when the final flush itself failed
    pub flush_error: Option<String>,
}

impl UnitOutcome {
    /// Whether the unit ended abnormally or lost its flush
    pub fn is_failure(&self) -> bool {
        self.exhaustion.is_failure() || self.flush_error.is_some()
    }
}

/// Summary of a whole run
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    /// Outcomes in completion order
    pub outcomes: Vec<UnitOutcome>,
    /// Units planned but never started
    pub units_not_started: usize,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl CrawlReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn units_completed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_failure()).count()
    }

    pub fn units_failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    pub fn pages_fetched(&self) -> usize {
        self.outcomes.iter().map(|o| o.pages_fetched).sum()
    }

    pub fn pages_skipped(&self) -> usize {
        self.outcomes.iter().map(|o| o.pages_skipped).sum()
    }

    pub fn records_written(&self) -> usize {
        self.outcomes.iter().map(|o| o.records_flushed).sum()
    }

    /// Outcome of a unit by id
    pub fn outcome(&self, unit_id: &str) -> Option<&UnitOutcome> {
        self.outcomes.iter().find(|o| o.unit_id == unit_id)
    }

    /// Emits the one-line summary through `tracing`
    pub fn log_summary(&self) {
        tracing::info!(
            "Run {}: {} units completed, {} failed, {} pages skipped, {} records written in {:.1}s",
            if self.interrupted { "interrupted" } else { "finished" },
            self.units_completed(),
            self.units_failed(),
            self.pages_skipped(),
            self.records_written(),
            self.elapsed.as_secs_f64()
        );
    }
}

/// Prints the report to stdout in a formatted manner
///
/// # Arguments
///
/// * `report` - The report to display
pub fn print_report(report: &CrawlReport) {
    println!("=== Harvest Report ===\n");

    println!("Overview:");
    println!("  Units completed: {}", report.units_completed());
    println!("  Units failed: {}", report.units_failed());
    if report.units_not_started > 0 {
        println!("  Units not started: {}", report.units_not_started);
    }
    println!("  Pages fetched: {}", report.pages_fetched());
    println!("  Pages skipped: {}", report.pages_skipped());
    println!("  Records written: {}", report.records_written());
    println!("  Elapsed: {:.1}s", report.elapsed.as_secs_f64());
    if report.interrupted {
        println!("  Status: interrupted");
    }
    println!();

    println!("Units:");
    for outcome in &report.outcomes {
        let status = match &outcome.flush_error {
            Some(err) => format!("flush failed: {}", err),
            None => outcome.exhaustion.to_string(),
        };
        println!(
            "  {:<32} {:>4} pages {:>3} skipped {:>6} rows  {}",
            outcome.unit_id, outcome.pages_fetched, outcome.pages_skipped, outcome.records_flushed, status
        );
    }
}
