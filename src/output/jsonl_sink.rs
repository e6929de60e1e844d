//! JSON-lines destination: one object per record, no header

use crate::crawler::WorkUnit;
use crate::extract::Record;
use crate::output::{FlushOutcome, IncrementalSink, SinkError};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Appends records to a JSON-lines file
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }
}

impl IncrementalSink for JsonLinesSink {
    fn flush(&self, unit: &WorkUnit, records: &[Record]) -> Result<FlushOutcome, SinkError> {
        if records.is_empty() {
            tracing::info!("No data for unit {}", unit.id);
            return Ok(FlushOutcome::default());
        }

        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&buffer)?;
        file.flush()?;

        tracing::info!(
            "Flushed {} rows for {} to {}",
            records.len(),
            unit.id,
            self.path.display()
        );

        Ok(FlushOutcome {
            rows_written: records.len(),
            header_written: false,
        })
    }
}
