//! Statistics over an existing CSV output file
//!
//! Counts rows per distinct value of one column, e.g. rows per work unit or
//! per ticker.

use crate::output::SinkError;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

/// Row counts grouped by one column
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnCounts {
    pub column: String,
    pub total_rows: u64,
    pub counts: BTreeMap<String, u64>,
}

impl ColumnCounts {
    /// Values sorted by count, most frequent first
    pub fn ranked(&self) -> Vec<(&str, u64)> {
        let mut ranked: Vec<(&str, u64)> = self.counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        ranked
    }
}

/// Loads row counts per value of `column` from a CSV file
///
/// # Arguments
///
/// * `path` - The CSV file written by a previous run
/// * `column` - Header name to group by
///
/// # Returns
///
/// * `Ok(ColumnCounts)` - Successfully counted rows
/// * `Err(SinkError)` - The file cannot be read or lacks the column
pub fn load_column_counts(path: &Path, column: &str) -> Result<ColumnCounts, SinkError> {
    let mut reader = csv::Reader::from_reader(File::open(path)?);

    let index = reader
        .headers()?
        .iter()
        .position(|h| h.trim_start_matches('\u{feff}') == column)
        .ok_or_else(|| SinkError::HeaderMismatch(format!("{} has no column '{}'", path.display(), column)))?;

    let mut counts = ColumnCounts {
        column: column.to_string(),
        ..ColumnCounts::default()
    };

    for row in reader.records() {
        let row = row?;
        let value = row.get(index).unwrap_or("").to_string();
        *counts.counts.entry(value).or_insert(0) += 1;
        counts.total_rows += 1;
    }

    Ok(counts)
}

/// Prints row counts to stdout in a formatted manner
pub fn print_column_counts(counts: &ColumnCounts) {
    println!("=== Output Statistics ===\n");
    println!("Total rows: {}", counts.total_rows);
    println!();

    println!("Rows by {}:", counts.column);
    for (value, count) in counts.ranked() {
        let percentage = if counts.total_rows > 0 {
            (count as f64 / counts.total_rows as f64) * 100.0
        } else {
            0.0
        };
        let value = if value.is_empty() { "(empty)" } else { value };
        println!("  {}: {} ({:.1}%)", value, count, percentage);
    }
}
