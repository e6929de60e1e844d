//! Scripted collaborators shared by the integration tests

use async_trait::async_trait;
use holdings_harvest::config::RateLimitConfig;
use holdings_harvest::crawler::{
    CursorPosition, FetchError, FetchRequest, PageFetcher, Pagination, RateLimiter, RawPage, ShutdownSignal,
    WorkUnit,
};
use holdings_harvest::extract::{ExtractError, ExtractedPage, Record, RecordExtractor};
use holdings_harvest::output::{FlushOutcome, IncrementalSink, SinkError};
use holdings_harvest::sites::Site;
use holdings_harvest::HarvestError;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use url::Url;

/// Timestamp every scripted unit starts paging back from
pub const START: i64 = 1_000_000;

/// One scripted response
#[derive(Debug, Clone)]
pub enum Step {
    /// A page of `records` items, all at position `marker`
    Page { records: usize, marker: i64 },
    /// A page without items
    Empty,
    Fail(FetchError),
    /// A page the extractor cannot survive
    Panic,
}

/// Pages backwards from [`START`] like a timestamp-paged API
pub struct ScriptedSite;

impl Site for ScriptedSite {
    fn pagination(&self) -> Pagination {
        Pagination::Before
    }

    fn start(&self, _unit: &WorkUnit) -> CursorPosition {
        CursorPosition::Before(START)
    }

    fn request(&self, unit: &WorkUnit, position: &CursorPosition) -> Result<FetchRequest, HarvestError> {
        let mut url = Url::parse(&format!("http://fake.test/{}", unit.target_id))?;
        if let CursorPosition::Before(ts) = position {
            url.query_pairs_mut().append_pair("before", &ts.to_string());
        }
        Ok(FetchRequest {
            unit_id: unit.id.clone(),
            url,
            position: position.clone(),
        })
    }
}

/// Replays per-unit scripts and records every call
///
/// A unit whose script has run out gets empty pages.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    always_fail: Mutex<HashMap<String, FetchError>>,
    calls: Mutex<Vec<(String, CursorPosition, Instant)>>,
    interrupt: Mutex<Option<(usize, ShutdownSignal)>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, unit_id: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(unit_id.to_string(), steps.into());
        self
    }

    pub fn always_fail(self, unit_id: &str, error: FetchError) -> Self {
        self.always_fail
            .lock()
            .unwrap()
            .insert(unit_id.to_string(), error);
        self
    }

    /// Triggers `signal` while serving the `call`-th fetch (1-based, any unit)
    pub fn interrupt_on_call(self, call: usize, signal: ShutdownSignal) -> Self {
        *self.interrupt.lock().unwrap() = Some((call, signal));
        self
    }

    /// Fetch calls made for `unit_id`, with the instant of each call
    pub fn calls_for(&self, unit_id: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id == unit_id)
            .map(|(_, _, at)| *at)
            .collect()
    }

    /// Cursor positions requested for `unit_id`, in call order
    pub fn positions_for(&self, unit_id: &str) -> Vec<CursorPosition> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id == unit_id)
            .map(|(_, position, _)| position.clone())
            .collect()
    }

    pub fn remaining_steps(&self, unit_id: &str) -> usize {
        self.scripts
            .lock()
            .unwrap()
            .get(unit_id)
            .map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<RawPage, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((request.unit_id.clone(), request.position.clone(), Instant::now()));
            calls.len()
        };
        if let Some((at, signal)) = &*self.interrupt.lock().unwrap() {
            if *at == call {
                signal.trigger();
            }
        }

        if let Some(error) = self.always_fail.lock().unwrap().get(&request.unit_id) {
            return Err(error.clone());
        }

        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.unit_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Empty);

        let body = match step {
            Step::Page { records, marker } => format!("{}@{}", records, marker),
            Step::Empty => "0@0".to_string(),
            Step::Fail(error) => return Err(error),
            Step::Panic => "panic".to_string(),
        };

        Ok(RawPage {
            url: request.url.to_string(),
            body,
        })
    }
}

/// Reads `<count>@<marker>` bodies produced by [`ScriptedFetcher`]
pub struct ScriptedExtractor;

impl RecordExtractor for ScriptedExtractor {
    fn extract(&self, request: &FetchRequest, page: &RawPage) -> Result<ExtractedPage, ExtractError> {
        if page.body == "panic" {
            panic!("cannot read page for {}", request.unit_id);
        }
        let (count, marker) = page
            .body
            .split_once('@')
            .and_then(|(c, m)| Some((c.parse::<usize>().ok()?, m.parse::<i64>().ok()?)))
            .ok_or_else(|| ExtractError::Malformed(page.body.clone()))?;

        let records = (0..count)
            .map(|i| {
                Record::new()
                    .with_field("item", format!("{}-{}-{}", request.unit_id, marker, i))
                    .with_field("marker", marker.to_string())
            })
            .collect();

        Ok(ExtractedPage {
            records,
            item_count: count,
            markers: vec![marker; count],
            follow_ups: Vec::new(),
        })
    }
}

/// Records every flush call, optionally forwarding to a real sink
#[derive(Default)]
pub struct RecordingSink {
    inner: Option<Arc<dyn IncrementalSink>>,
    flushes: Mutex<Vec<(String, usize)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrapping(inner: Arc<dyn IncrementalSink>) -> Self {
        Self {
            inner: Some(inner),
            flushes: Mutex::new(Vec::new()),
        }
    }

    /// `(unit id, record count)` per flush call, in call order
    pub fn flushes(&self) -> Vec<(String, usize)> {
        self.flushes.lock().unwrap().clone()
    }
}

impl IncrementalSink for RecordingSink {
    fn flush(&self, unit: &WorkUnit, records: &[Record]) -> Result<FlushOutcome, SinkError> {
        self.flushes
            .lock()
            .unwrap()
            .push((unit.id.clone(), records.len()));
        match &self.inner {
            Some(inner) => inner.flush(unit, records),
            None => Ok(FlushOutcome {
                rows_written: records.len(),
                header_written: false,
            }),
        }
    }
}

pub fn fast_limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(&RateLimitConfig {
        soft_limit: 1000,
        window_secs: 60,
        min_spacing_ms: 0,
        max_spacing_ms: 0,
        cooldown_secs: 30,
    }))
}

pub fn unit(id: &str) -> WorkUnit {
    WorkUnit::new(id, format!("Target {}", id), BTreeMap::new(), None)
}

/// Data rows of a CSV file and its header
pub fn read_csv(path: &Path) -> (Vec<String>, Vec<csv::StringRecord>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let header = reader
        .headers()
        .unwrap()
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();
    let rows = reader.records().map(Result::unwrap).collect();
    (header, rows)
}
