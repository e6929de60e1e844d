use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Main configuration structure for Holdings-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub window: Option<WindowConfig>,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(rename = "target", default)]
    pub targets: Vec<TargetEntry>,
}

/// Which site a run crawls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// PullPush reddit submission search, paged backwards by timestamp
    Pullpush,
    /// Dataroma quarterly portfolio snapshot, one page per manager-quarter
    DataromaHoldings,
    /// Dataroma per-ticker transaction history, discovered from a manager's activity page
    DataromaHistory,
    /// Dataroma manager performance page, yearly returns
    DataromaPerformance,
    /// WhaleWisdom filer holdings table
    Whalewisdom,
}

impl SourceKind {
    /// Whether work units for this source are scoped to a time window
    pub fn needs_window(&self) -> bool {
        matches!(self, Self::Pullpush | Self::DataromaHoldings)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pullpush => "pullpush",
            Self::DataromaHoldings => "dataroma-holdings",
            Self::DataromaHistory => "dataroma-history",
            Self::DataromaPerformance => "dataroma-performance",
            Self::Whalewisdom => "whalewisdom",
        };
        f.write_str(name)
    }
}

/// Crawl loop behavior
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    pub source: SourceKind,

    /// Number of work units crawled at once (1 = sequential)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Transient fetch failures tolerated at one cursor position
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause after a transient failure before retrying (milliseconds)
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Matched records after which a unit stops paging
    #[serde(rename = "target-count", default)]
    pub target_count: Option<usize>,

    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Request budget for the shared rate limiter
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per rolling window
    #[serde(rename = "soft-limit", default = "default_soft_limit")]
    pub soft_limit: usize,

    #[serde(rename = "window-secs", default = "default_window_secs")]
    pub window_secs: u64,

    /// Lower bound of the jittered gap between two requests (milliseconds)
    #[serde(rename = "min-spacing-ms", default = "default_spacing_ms")]
    pub min_spacing_ms: u64,

    /// Upper bound of the jittered gap between two requests (milliseconds)
    #[serde(rename = "max-spacing-ms", default = "default_spacing_ms")]
    pub max_spacing_ms: u64,

    /// Admission pause after the remote side throttles us
    #[serde(rename = "cooldown-secs", default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            soft_limit: default_soft_limit(),
            window_secs: default_window_secs(),
            min_spacing_ms: default_spacing_ms(),
            max_spacing_ms: default_spacing_ms(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// User agent sent with every request
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    #[serde(default = "default_user_agent")]
    pub value: String,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            value: default_user_agent(),
        }
    }
}

/// Output file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Jsonl,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Destination file, appended to across runs
    pub path: String,

    #[serde(default)]
    pub format: OutputFormat,

    /// Prefix a newly created CSV file with a UTF-8 byte order mark
    #[serde(rename = "byte-order-mark", default = "default_true")]
    pub byte_order_mark: bool,
}

/// Range of calendar years expanded into quarters
#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    #[serde(rename = "start-year")]
    pub start_year: i32,

    #[serde(rename = "end-year")]
    pub end_year: i32,
}

/// Site-specific knobs
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceConfig {
    /// Overrides the site's public base URL
    #[serde(rename = "base-url", default)]
    pub base_url: Option<String>,

    /// Ticker symbols matched in post text (pullpush)
    #[serde(default)]
    pub tickers: Vec<String>,

    /// Field the submission search sorts on (pullpush)
    #[serde(rename = "sort-type", default)]
    pub sort_type: Option<String>,

    /// Items requested per page (pullpush)
    #[serde(rename = "page-size", default)]
    pub page_size: Option<u32>,

    /// Characters of post body kept per record (pullpush)
    #[serde(rename = "selftext-limit", default)]
    pub selftext_limit: Option<usize>,

    /// Rows kept from each extracted table
    #[serde(rename = "top-rows", default)]
    pub top_rows: Option<usize>,
}

/// One crawl target (a manager, a subreddit, a filer)
#[derive(Debug, Clone, Deserialize)]
pub struct TargetEntry {
    /// Site-side identifier (manager code, subreddit name, filer slug)
    pub id: String,

    /// Human readable name
    pub label: String,

    /// Classification labels copied onto every record of this target
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Overrides `[crawler] target-count` for this target
    #[serde(rename = "target-count", default)]
    pub target_count: Option<usize>,
}

fn default_concurrency() -> usize {
    1
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_soft_limit() -> usize {
    14
}

fn default_window_secs() -> u64 {
    60
}

fn default_spacing_ms() -> u64 {
    4000
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("HoldingsHarvest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_true() -> bool {
    true
}
