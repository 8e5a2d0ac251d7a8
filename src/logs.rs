//! Log collection for machine-readable runs.
//!
//! Instead of printing to stderr, a [`LogCollector`] keeps every record in
//! memory so a caller can emit the whole run as JSON once the pass is over.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use log::{LevelFilter, Log, Metadata, Record};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// One collected log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// `error`, `warn`, `info`, `debug` or `trace`
    #[serde(rename = "type")]
    pub level: String,
    /// Module that emitted the record
    pub tag: String,
    pub message: String,
    pub date: DateTime<Utc>,
}

/// `log::Log` implementation that buffers records instead of printing them.
///
/// Clones share the same buffer, so one clone can be installed as the global
/// logger while another is kept to flush the records.
#[derive(Debug, Clone)]
pub struct LogCollector {
    level: LevelFilter,
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl LogCollector {
    pub fn new(level: LevelFilter) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Install a clone of this collector as the global logger.
    pub fn install(&self) -> Result<()> {
        log::set_boxed_logger(Box::new(self.clone()))
            .map_err(|e| Error::Other(format!("failed to install log collector: {}", e)))?;
        log::set_max_level(self.level);
        Ok(())
    }

    /// Take every collected entry, oldest first. The buffer is left empty.
    pub fn flush_logs(&self) -> Vec<LogEntry> {
        let mut entries = match self.entries.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        entries.sort_by_key(|entry| entry.date);
        entries
    }

    /// Collected entries as a JSON array.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.flush_logs())?)
    }
}

impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let entry = LogEntry {
            level: record.level().as_str().to_ascii_lowercase(),
            tag: record.target().to_string(),
            message: record.args().to_string(),
            date: Utc::now(),
        };
        match self.entries.lock() {
            Ok(mut guard) => guard.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }

    fn flush(&self) {}
}
