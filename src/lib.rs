//! Holdings-Harvest: an incremental, rate-limited crawler for public holdings
//! and sentiment sources
//!
//! This crate drives a list of work units (a fund manager, a subreddit
//! quarter, a filer) through a paginated fetch → extract → flush loop,
//! appending normalized rows to a single tabular file per crawl target.

pub mod config;
pub mod crawler;
pub mod extract;
pub mod output;
pub mod sites;

use thiserror::Error;

/// Main error type for Holdings-Harvest operations
///
/// Only setup-time failures surface through this type. Page- and unit-level
/// problems are recovered inside the crawl loop and reported, not raised.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Cannot build request for {unit}: {message}")]
    Request { unit: String, message: String },

    #[error("Output error: {0}")]
    Sink(#[from] output::SinkError),

    #[error("Source unreachable: {0}")]
    SourceUnreachable(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Coordinator, CrawlOptions, RateLimiter, WorkUnit};
pub use extract::{Record, RecordExtractor};
pub use output::{CsvSink, IncrementalSink};
