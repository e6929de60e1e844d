//! Pagination cursor
//!
//! Tracks where a work unit's pagination stands and decides when the unit is
//! exhausted. The cursor never performs I/O: the coordinator reports each
//! page outcome and asks for the next position.
//!
//! # State machine
//!
//! ```text
//! Active ──page with items──────────▶ Active (position advanced)
//!   │    ──target count reached─────▶ Exhausted(TargetReached)
//!   │    ──empty page───────────────▶ Exhausted(NoMoreData)
//!   │    ──transient failure ≤ N────▶ Active (same position)
//!   │    ──transient failure > N────▶ Exhausted(RetriesExhausted)
//!   │    ──throttled (429)──────────▶ Active (same position, no retry spent)
//!   │    ──unusable page────────────▶ Active (next key / one retry) or Exhausted(Failed)
//!   └────interrupt──────────────────▶ Exhausted(Interrupted)
//! ```
//!
//! No transition leaves `Exhausted`.

use crate::crawler::FetchError;
use crate::extract::ExtractedPage;
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// How a source pages through one work unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// One page per unit
    Single,
    /// Pages walk backwards in time; each request asks for items strictly
    /// before the oldest item seen so far
    Before,
    /// A seed page lists follow-up keys; each key is one more page
    Queue,
}

/// Where the next request of a unit points
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CursorPosition {
    /// The unit's first page
    Start,
    /// Items strictly older than this timestamp
    Before(i64),
    /// The page of a follow-up key discovered on the seed page
    Follow(String),
}

impl fmt::Display for CursorPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Before(ts) => write!(f, "before={}", ts),
            Self::Follow(key) => write!(f, "key={}", key),
        }
    }
}

/// Why a unit stopped paging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exhaustion {
    /// The source returned an empty page or ran out of follow-up keys
    NoMoreData,
    /// The per-unit matched-record target was reached
    TargetReached,
    /// A shutdown was requested
    Interrupted,
    /// Transient fetch failures exceeded the retry budget at one position
    RetriesExhausted(FetchError),
    /// Pagination could not make progress
    Failed(String),
}

impl Exhaustion {
    /// Whether the unit ended abnormally
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::RetriesExhausted(_) | Self::Failed(_))
    }
}

impl fmt::Display for Exhaustion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMoreData => write!(f, "no more data"),
            Self::TargetReached => write!(f, "target reached"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::RetriesExhausted(err) => write!(f, "retries exhausted: {}", err),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Lifecycle state of a cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorState {
    Active,
    Exhausted(Exhaustion),
}

/// Position and progress of one work unit's pagination
#[derive(Debug, Clone)]
pub struct PaginationCursor {
    mode: Pagination,
    position: CursorPosition,
    state: CursorState,
    pending: VecDeque<String>,
    seen: HashSet<String>,
    matched: usize,
    target: Option<usize>,
    attempts: u32,
    max_retries: u32,
    held: bool,
    pages_fetched: usize,
    pages_skipped: usize,
}

impl PaginationCursor {
    /// Creates an active cursor at the unit's starting boundary
    ///
    /// # Arguments
    ///
    /// * `mode` - How the source pages
    /// * `start` - The unit's first position
    /// * `target` - Matched records after which the unit stops
    /// * `max_retries` - Transient failures tolerated at one position
    pub fn new(mode: Pagination, start: CursorPosition, target: Option<usize>, max_retries: u32) -> Self {
        Self {
            mode,
            position: start,
            state: CursorState::Active,
            pending: VecDeque::new(),
            seen: HashSet::new(),
            matched: 0,
            target,
            attempts: 0,
            max_retries,
            held: false,
            pages_fetched: 0,
            pages_skipped: 0,
        }
    }

    pub fn position(&self) -> &CursorPosition {
        &self.position
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == CursorState::Active
    }

    /// The exhaustion reason, once the cursor is terminal
    pub fn exhaustion(&self) -> Option<&Exhaustion> {
        match &self.state {
            CursorState::Active => None,
            CursorState::Exhausted(reason) => Some(reason),
        }
    }

    pub fn matched(&self) -> usize {
        self.matched
    }

    /// Transient failures spent at the current position
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn pages_skipped(&self) -> usize {
        self.pages_skipped
    }

    /// Records a successfully extracted page and moves to the next position
    ///
    /// # Arguments
    ///
    /// * `page` - The extraction result of the page
    /// * `matched` - Records the page contributed to the unit
    pub fn advance(&mut self, page: &ExtractedPage, matched: usize) {
        if !self.is_active() {
            return;
        }

        self.pages_fetched += 1;
        self.matched += matched;
        self.attempts = 0;
        self.held = false;

        if self.target.is_some_and(|target| self.matched >= target) {
            self.finish(Exhaustion::TargetReached);
            return;
        }

        match self.mode {
            Pagination::Single => {
                self.finish(Exhaustion::NoMoreData);
            }
            Pagination::Before => {
                if page.item_count == 0 {
                    self.finish(Exhaustion::NoMoreData);
                    return;
                }
                let Some(oldest) = page.markers.iter().copied().min() else {
                    self.finish(Exhaustion::Failed(
                        "page carried no position markers".to_string(),
                    ));
                    return;
                };
                match self.position {
                    CursorPosition::Before(current) if oldest >= current => {
                        self.finish(Exhaustion::Failed(format!(
                            "position did not move past {}",
                            current
                        )));
                    }
                    _ => self.position = CursorPosition::Before(oldest),
                }
            }
            Pagination::Queue => {
                for key in &page.follow_ups {
                    if self.seen.insert(key.clone()) {
                        self.pending.push_back(key.clone());
                    }
                }
                self.next_key();
            }
        }
    }

    /// Records a failed fetch at the current position
    ///
    /// Throttling leaves the cursor untouched, transient failures spend the
    /// retry budget, and permanent failures are handled like an unusable page.
    pub fn fetch_failed(&mut self, err: &FetchError) {
        if !self.is_active() || err.is_rate_limited() {
            return;
        }

        if err.is_transient() {
            self.attempts += 1;
            if self.attempts > self.max_retries {
                self.finish(Exhaustion::RetriesExhausted(err.clone()));
            }
        } else {
            self.skip_page(&err.to_string());
        }
    }

    /// Records a page whose content could not be used
    ///
    /// Queue pagination moves on to the next key. Other modes have no
    /// position to derive, so they retry the same position once and then
    /// give up on the unit.
    pub fn skip_page(&mut self, reason: &str) {
        if !self.is_active() {
            return;
        }

        self.pages_skipped += 1;
        self.attempts = 0;

        if self.mode == Pagination::Queue && self.position != CursorPosition::Start {
            self.next_key();
            return;
        }

        if self.held {
            self.finish(Exhaustion::Failed(reason.to_string()));
        } else {
            self.held = true;
        }
    }

    /// Stops the cursor at the current page boundary
    pub fn interrupt(&mut self) {
        if self.is_active() {
            self.finish(Exhaustion::Interrupted);
        }
    }

    /// Ends the unit abnormally, e.g. when no request can be built
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.is_active() {
            self.finish(Exhaustion::Failed(reason.into()));
        }
    }

    fn next_key(&mut self) {
        match self.pending.pop_front() {
            Some(key) => self.position = CursorPosition::Follow(key),
            None => self.finish(Exhaustion::NoMoreData),
        }
    }

    fn finish(&mut self, reason: Exhaustion) {
        self.state = CursorState::Exhausted(reason);
    }
}
