//! Output module for durable record storage and run reporting
//!
//! This module handles:
//! - Appending each work unit's records to the destination file
//! - Writing the header row only when the destination is created
//! - Summarizing a run and the distribution of an existing output file

mod csv_sink;
mod jsonl_sink;
pub mod report;
pub mod stats;

pub use csv_sink::CsvSink;
pub use jsonl_sink::JsonLinesSink;
pub use report::{print_report, CrawlReport, UnitOutcome};
pub use stats::{load_column_counts, print_column_counts, ColumnCounts};

use crate::config::{OutputConfig, OutputFormat};
use crate::crawler::WorkUnit;
use crate::extract::Record;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while writing or reading output
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unusable header in {0}")]
    HeaderMismatch(String),
}

/// Result of one flush call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Data rows appended
    pub rows_written: usize,
    /// Whether this flush created the destination's header
    pub header_written: bool,
}

/// Append-only destination for work unit records
///
/// The sink is the single writer of its destination. Implementations must
/// serialize concurrent flushes so one unit's batch is never interleaved
/// with another's.
pub trait IncrementalSink: Send + Sync {
    /// Appends one work unit's records
    ///
    /// # Arguments
    ///
    /// * `unit` - The unit the records belong to
    /// * `records` - Attributed records, possibly empty
    ///
    /// # Returns
    ///
    /// * `Ok(FlushOutcome)` - Rows are durable on return
    /// * `Err(SinkError)` - Nothing or only part of the batch was written
    fn flush(&self, unit: &WorkUnit, records: &[Record]) -> Result<FlushOutcome, SinkError>;
}

/// Opens the sink described by the output configuration
pub fn open_sink(config: &OutputConfig) -> Result<Arc<dyn IncrementalSink>, SinkError> {
    let path = Path::new(&config.path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let sink: Arc<dyn IncrementalSink> = match config.format {
        OutputFormat::Csv => Arc::new(CsvSink::new(path, config.byte_order_mark)),
        OutputFormat::Jsonl => Arc::new(JsonLinesSink::new(path)),
    };
    Ok(sink)
}
