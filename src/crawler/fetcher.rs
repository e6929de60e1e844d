//! Page fetching
//!
//! This module defines the fetch seam of the crawl loop:
//! - The request descriptor built fresh for every page attempt
//! - The [`PageFetcher`] trait the coordinator calls through
//! - An HTTP implementation on top of `reqwest`
//! - Classification of failures into timeout, HTTP status, and network errors

use crate::config::UserAgentConfig;
use crate::crawler::CursorPosition;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Describes one page attempt
///
/// Built from a work unit and a cursor position; carries no state of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Work unit the page belongs to
    pub unit_id: String,
    /// Full URL including query parameters
    pub url: Url,
    /// Cursor position the request was built from
    pub position: CursorPosition,
}

/// Raw content of a fetched page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    /// Final URL after redirects
    pub url: String,
    pub body: String,
}

/// Why a page could not be fetched
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },
}

impl FetchError {
    /// Whether the remote side explicitly throttled us (HTTP 429)
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::HttpStatus { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS.as_u16())
    }

    /// Whether retrying the same request may succeed
    ///
    /// | Condition | Transient |
    /// |-----------|-----------|
    /// | Timeout | yes |
    /// | Connection / network error | yes |
    /// | HTTP 408, 5xx | yes |
    /// | HTTP 429 | no (handled by cooldown) |
    /// | Other HTTP status | no |
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network { .. } => true,
            Self::HttpStatus { status, .. } => {
                *status == StatusCode::REQUEST_TIMEOUT.as_u16() || (500..600).contains(status)
            }
        }
    }

    /// Whether the source could not be reached at all
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// Fetches raw page content
///
/// The coordinator gates every call through the rate limiter; implementations
/// only perform the request.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<RawPage, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Whole-request timeout
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use holdings_harvest::config::UserAgentConfig;
/// use holdings_harvest::crawler::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     value: "HoldingsHarvest/1.0".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig, timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.value.as_str())
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10).min(timeout))
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`PageFetcher`] backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<RawPage, FetchError> {
        let url = request.url.to_string();
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(request.url.clone())
            .send()
            .await
            .map_err(|e| classify_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url,
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| classify_error(&url, e))?;

        Ok(RawPage {
            url: final_url,
            body,
        })
    }
}

fn classify_error(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}
