//! Per-host append-only event log
//!
//! One CSV file per host at `{log_dir}/{hostname}.log`. Every row is written
//! and flushed on its own so a crash loses at most the row in flight.

use crate::media::{Category, MediaItem};
use chrono::{DateTime, FixedOffset, Local, SecondsFormat};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Header row of every event log.
pub const HEADER: &str = "Time,Event,Type,Name,File,Size (GB)";

/// Extension of event log files.
pub const LOG_EXTENSION: &str = "log";

/// Error type for event log operations
#[derive(Debug, Error)]
pub enum EventLogError {
    /// Log directory could not be created
    #[error("Failed to create log directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    /// Log file could not be opened or written
    #[error("Failed to write event log {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Whether a row marks the beginning or the end of a transcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    End,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::End => "end",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "start" => Some(EventKind::Start),
            "end" => Some(EventKind::End),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the event log
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Local wall-clock time with its UTC offset, second precision
    pub timestamp: DateTime<FixedOffset>,
    pub kind: EventKind,
    pub category: Category,
    /// Movie folder or series name
    pub group: String,
    /// File basename
    pub name: String,
    /// File size in GB (2^30 bytes)
    pub size_gb: f64,
}

impl EventRecord {
    /// Build a record for an item whose size has already been measured
    pub fn for_item(item: &MediaItem, kind: EventKind, size_gb: f64, timestamp: DateTime<FixedOffset>) -> Self {
        Self {
            timestamp,
            kind,
            category: item.category,
            group: item.group.clone(),
            name: item.name.clone(),
            size_gb,
        }
    }

    /// CSV row without the trailing newline
    pub fn to_row(&self) -> String {
        format!(
            "{},{},{},{},{},{:.2}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, false),
            self.kind,
            self.category,
            quote(&self.group),
            quote(&self.name),
            self.size_gb
        )
    }
}

/// Wrap a field in double quotes, doubling any embedded quote
fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Current local time carrying its UTC offset
pub fn local_now() -> DateTime<FixedOffset> {
    Local::now().into()
}

/// Path of the log file for `hostname` inside `log_dir`
pub fn log_path(log_dir: &Path, hostname: &str) -> PathBuf {
    log_dir.join(format!("{}.{}", hostname, LOG_EXTENSION))
}

/// Hostname of this machine, `localhost` when it cannot be determined
pub fn hostname() -> String {
    sysinfo::System::host_name()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Append-only writer for one host's log
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    /// Open the log for `hostname`, creating the directory and header row if absent
    pub fn open(log_dir: &Path, hostname: &str) -> Result<Self, EventLogError> {
        fs::create_dir_all(log_dir).map_err(|source| EventLogError::CreateDir {
            path: log_dir.to_path_buf(),
            source,
        })?;

        let log = Self {
            path: log_path(log_dir, hostname),
        };

        let needs_header = fs::metadata(&log.path).map(|m| m.len() == 0).unwrap_or(true);
        if needs_header {
            log.write_line(HEADER)?;
        } else {
            log.open_append()?;
        }

        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_start(&self, record: &EventRecord) -> Result<(), EventLogError> {
        debug_assert_eq!(record.kind, EventKind::Start);
        self.write_line(&record.to_row())
    }

    pub fn append_end(&self, record: &EventRecord) -> Result<(), EventLogError> {
        debug_assert_eq!(record.kind, EventKind::End);
        self.write_line(&record.to_row())
    }

    fn open_append(&self) -> Result<File, EventLogError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.write_error(source))
    }

    fn write_line(&self, line: &str) -> Result<(), EventLogError> {
        let mut file = self.open_append()?;
        writeln!(file, "{}", line).map_err(|e| self.write_error(e))?;
        file.flush().map_err(|e| self.write_error(e))
    }

    fn write_error(&self, source: io::Error) -> EventLogError {
        EventLogError::Write {
            path: self.path.clone(),
            source,
        }
    }
}
