//! CSV destination
//!
//! A newly created file gets an optional UTF-8 byte order mark and one header
//! row built from the first flushed batch. When the file already exists, its
//! header is read back and later rows follow that column order, so appends
//! from separate runs line up.

use crate::crawler::WorkUnit;
use crate::extract::Record;
use crate::output::{FlushOutcome, IncrementalSink, SinkError};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const BYTE_ORDER_MARK: &[u8] = b"\xEF\xBB\xBF";

/// Appends records to a single CSV file
#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
    byte_order_mark: bool,
    /// Header of the destination once known
    header: Mutex<Option<Vec<String>>>,
}

impl CsvSink {
    pub fn new(path: impl AsRef<Path>, byte_order_mark: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            byte_order_mark,
            header: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn encode(&self, header: &[String], records: &[Record], with_header: bool) -> Result<Vec<u8>, SinkError> {
        let mut buffer = Vec::new();
        if with_header && self.byte_order_mark {
            buffer.extend_from_slice(BYTE_ORDER_MARK);
        }

        let mut writer = csv::Writer::from_writer(buffer);
        if with_header {
            writer.write_record(header)?;
        }
        for record in records {
            writer.write_record(header.iter().map(|column| record.get(column).unwrap_or("")))?;
        }

        writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl IncrementalSink for CsvSink {
    fn flush(&self, unit: &WorkUnit, records: &[Record]) -> Result<FlushOutcome, SinkError> {
        if records.is_empty() {
            tracing::info!("No data for unit {}", unit.id);
            return Ok(FlushOutcome::default());
        }

        let mut cached = self
            .header
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if cached.is_none() && has_content(&self.path)? {
            *cached = Some(read_header(&self.path)?);
        }

        let (header, creating) = match cached.as_ref() {
            Some(header) => (header.clone(), false),
            None => (header_for(records), true),
        };

        if !creating {
            warn_unknown_columns(&header, records, &self.path);
        }

        let bytes = self.encode(&header, records, creating)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&bytes)?;
        file.flush()?;

        *cached = Some(header);

        tracing::info!(
            "Flushed {} rows for {} to {}",
            records.len(),
            unit.id,
            self.path.display()
        );

        Ok(FlushOutcome {
            rows_written: records.len(),
            header_written: creating,
        })
    }
}

fn has_content(path: &Path) -> Result<bool, SinkError> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len() > 0),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Reads the header row of an existing CSV file, ignoring a byte order mark
pub(crate) fn read_header(path: &Path) -> Result<Vec<String>, SinkError> {
    let mut reader = csv::Reader::from_reader(File::open(path)?);
    let header: Vec<String> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, column)| {
            if i == 0 {
                column.trim_start_matches('\u{feff}').to_string()
            } else {
                column.to_string()
            }
        })
        .collect();

    if header.iter().all(String::is_empty) {
        return Err(SinkError::HeaderMismatch(path.display().to_string()));
    }
    Ok(header)
}

/// Union of the batch's columns in first-seen order
fn header_for(records: &[Record]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut header = Vec::new();
    for record in records {
        for column in record.columns() {
            if seen.insert(column) {
                header.push(column.to_string());
            }
        }
    }
    header
}

fn warn_unknown_columns(header: &[String], records: &[Record], path: &Path) {
    let known: HashSet<&str> = header.iter().map(String::as_str).collect();
    let mut unknown: Vec<&str> = records
        .iter()
        .flat_map(Record::columns)
        .filter(|column| !known.contains(column))
        .collect();
    unknown.sort_unstable();
    unknown.dedup();

    if !unknown.is_empty() {
        tracing::warn!(
            "Dropping columns not in the header of {}: {}",
            path.display(),
            unknown.join(", ")
        );
    }
}
