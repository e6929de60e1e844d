//! Work units and their time windows
//!
//! A work unit is one independent crawl target: a configured target,
//! optionally scoped to a calendar quarter. Units are enumerated once at
//! start-up and never mutated afterwards.

use crate::config::{Config, TargetEntry};
use crate::extract::UNIT_ID_COLUMN;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// A calendar quarter in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub year: i32,
    pub quarter: u32,
    /// First instant of the quarter
    pub start: DateTime<Utc>,
    /// Last whole second of the quarter
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Builds the window for `quarter` (1-4) of `year`
    pub fn quarter(year: i32, quarter: u32) -> Option<Self> {
        if !(1..=4).contains(&quarter) {
            return None;
        }
        let start = quarter_start(year, quarter)?;
        let next = if quarter == 4 {
            quarter_start(year + 1, 1)?
        } else {
            quarter_start(year, quarter + 1)?
        };

        Some(Self {
            year,
            quarter,
            start,
            end: next - Duration::seconds(1),
        })
    }

    /// Short label such as `2024Q3`
    pub fn label(&self) -> String {
        format!("{}Q{}", self.year, self.quarter)
    }

    /// Quarter end as `YYYY-MM-DD`, the form 13F report dates take
    pub fn period_end(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }

    pub fn start_timestamp(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_timestamp(&self) -> i64 {
        self.end.timestamp()
    }
}

fn quarter_start(year: i32, quarter: u32) -> Option<DateTime<Utc>> {
    let month = (quarter - 1) * 3 + 1;
    let date = NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Expands a year range into quarters, skipping quarters that have not begun
pub fn quarters(start_year: i32, end_year: i32, now: DateTime<Utc>) -> Vec<TimeWindow> {
    (start_year..=end_year)
        .flat_map(|year| (1..=4).filter_map(move |q| TimeWindow::quarter(year, q)))
        .filter(|window| window.start <= now)
        .collect()
}

/// One independent crawl target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Stable identifier, unique within a run
    pub id: String,
    /// Site-side identifier of the target
    pub target_id: String,
    /// Human readable label
    pub label: String,
    /// Classification labels copied onto every record
    pub tags: BTreeMap<String, String>,
    pub window: Option<TimeWindow>,
    /// Matched records after which this unit stops, overriding the run default
    pub target_count: Option<usize>,
}

impl WorkUnit {
    pub fn new(
        target_id: impl Into<String>,
        label: impl Into<String>,
        tags: BTreeMap<String, String>,
        window: Option<TimeWindow>,
    ) -> Self {
        let target_id = target_id.into();
        let label = label.into();
        let (id, label) = match &window {
            Some(w) => (
                format!("{}:{}", target_id, w.label()),
                format!("{} {}", label, w.label()),
            ),
            None => (target_id.clone(), label),
        };

        Self {
            id,
            target_id,
            label,
            tags,
            window,
            target_count: None,
        }
    }

    pub fn with_target_count(mut self, target_count: Option<usize>) -> Self {
        self.target_count = target_count;
        self
    }

    /// Builds a unit for `target`, carrying every key of `tag_keys`
    ///
    /// Keys the target does not set are left empty, so every unit of a run
    /// shares the same provenance columns.
    fn from_target(target: &TargetEntry, tag_keys: &BTreeSet<String>, window: Option<TimeWindow>) -> Self {
        let tags = tag_keys
            .iter()
            .map(|key| (key.clone(), target.tags.get(key).cloned().unwrap_or_default()))
            .collect();
        Self::new(&target.id, &target.label, tags, window).with_target_count(target.target_count)
    }

    /// Provenance columns stamped onto every record of this unit
    pub fn provenance(&self) -> Vec<(String, String)> {
        let mut columns = vec![
            (UNIT_ID_COLUMN.to_string(), self.id.clone()),
            ("label".to_string(), self.label.clone()),
        ];
        columns.extend(self.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(window) = &self.window {
            columns.push(("year".to_string(), window.year.to_string()));
            columns.push(("quarter".to_string(), window.quarter.to_string()));
            columns.push(("period_end".to_string(), window.period_end()));
        }
        columns
    }
}

/// Enumerates the work units of a run
///
/// Windowed sources get one unit per (quarter, target), quarters outermost;
/// other sources get one unit per target. Configuration order is preserved.
/// Every unit carries the union of all targets' tag keys.
pub fn plan_work_units(config: &Config, now: DateTime<Utc>) -> Vec<WorkUnit> {
    let tag_keys: BTreeSet<String> = config
        .targets
        .iter()
        .flat_map(|t| t.tags.keys().cloned())
        .collect();

    let windows = match (&config.window, config.crawler.source.needs_window()) {
        (Some(window), true) => quarters(window.start_year, window.end_year, now),
        _ => {
            return config
                .targets
                .iter()
                .map(|t| WorkUnit::from_target(t, &tag_keys, None))
                .collect()
        }
    };

    windows
        .iter()
        .flat_map(|window| {
            let tag_keys = &tag_keys;
            config
                .targets
                .iter()
                .map(move |t| WorkUnit::from_target(t, tag_keys, Some(*window)))
        })
        .collect()
}
