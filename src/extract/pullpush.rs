//! PullPush submission search extraction
//!
//! The API answers `{"data": [post, ...]}`. Every post is one source item and
//! contributes its `created_utc` as a position marker; only posts mentioning
//! a target ticker produce records (one record per ticker mentioned).

use crate::crawler::{FetchRequest, RawPage};
use crate::extract::{ExtractError, ExtractedPage, Record, RecordExtractor};
use chrono::DateTime;
use regex::Regex;
use serde_json::Value;

/// Body characters kept per record when no limit is configured
pub const DEFAULT_SELFTEXT_LIMIT: usize = 1000;

/// Extracts ticker mentions from reddit submissions
#[derive(Debug, Clone)]
pub struct PullPushExtractor {
    tickers: Vec<(String, Regex)>,
    selftext_limit: usize,
}

impl PullPushExtractor {
    /// Creates an extractor matching the given ticker symbols
    ///
    /// Symbols are upper-cased, de-duplicated and matched as whole words
    /// against the upper-cased title and body of each post.
    pub fn new(tickers: &[String], selftext_limit: usize) -> Result<Self, regex::Error> {
        let mut symbols: Vec<String> = tickers
            .iter()
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        symbols.sort();
        symbols.dedup();

        let tickers = symbols
            .into_iter()
            .map(|symbol| {
                let pattern = format!(r"\b{}\b", regex::escape(&symbol));
                Regex::new(&pattern).map(|re| (symbol, re))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            tickers,
            selftext_limit,
        })
    }

    fn post_records(&self, post: &Value) -> Vec<Record> {
        let title = text(post, "title");
        let selftext = text(post, "selftext");
        let found = find_tickers(&format!("{} {}", title, selftext), &self.tickers);
        if found.is_empty() {
            return Vec::new();
        }

        let created = created_utc(post);
        let created_date = created
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let body: String = selftext.chars().take(self.selftext_limit).collect();
        let author = match text(post, "author") {
            a if a.is_empty() => "[deleted]".to_string(),
            a => a,
        };

        found
            .into_iter()
            .map(|ticker| {
                Record::new()
                    .with_field("source", "reddit")
                    .with_field("ticker", ticker)
                    .with_field("title", title.as_str())
                    .with_field("selftext", body.as_str())
                    .with_field("upvote_ratio", text(post, "upvote_ratio"))
                    .with_field("score", text(post, "score"))
                    .with_field("num_comments", text(post, "num_comments"))
                    .with_field("created_utc", created.map(|t| t.to_string()).unwrap_or_default())
                    .with_field("created_date", created_date.as_str())
                    .with_field("author", author.as_str())
                    .with_field("author_flair_text", text(post, "author_flair_text"))
                    .with_field("url", text(post, "url"))
                    .with_field(
                        "permalink",
                        format!("https://reddit.com{}", text(post, "permalink")),
                    )
            })
            .collect()
    }
}

impl RecordExtractor for PullPushExtractor {
    fn extract(&self, _request: &FetchRequest, page: &RawPage) -> Result<ExtractedPage, ExtractError> {
        let body: Value = serde_json::from_str(&page.body)
            .map_err(|e| ExtractError::Malformed(format!("invalid JSON: {}", e)))?;

        let posts = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| ExtractError::Malformed("response has no 'data' array".to_string()))?;

        let mut extracted = ExtractedPage {
            item_count: posts.len(),
            ..ExtractedPage::default()
        };

        for post in posts {
            if let Some(ts) = created_utc(post) {
                extracted.markers.push(ts);
            }
            extracted.records.extend(self.post_records(post));
        }

        Ok(extracted)
    }
}

/// Returns the symbols of `tickers` mentioned in `text` as whole words
pub fn find_tickers(text: &str, tickers: &[(String, Regex)]) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let upper = text.to_uppercase();
    tickers
        .iter()
        .filter(|(_, re)| re.is_match(&upper))
        .map(|(symbol, _)| symbol.clone())
        .collect()
}

fn created_utc(post: &Value) -> Option<i64> {
    let value = post.get("created_utc")?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

/// Renders a JSON field as plain text; missing and null become empty
fn text(post: &Value, key: &str) -> String {
    match post.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
