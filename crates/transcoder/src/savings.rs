//! Storage-savings aggregation over event logs
//!
//! Pairs each item's `start` row with the following `end` row of the same
//! common name, keeps the last complete pair per name, and summarises the
//! size delta across every log file given.
//!
//! Sign convention: elapsed time is `end - start` and savings are
//! `before - after`, so a transcode that shrinks a file has positive savings
//! and positive savings per hour. Nothing is negated at report time.

use crate::classify::common_name;
use crate::event_log::{EventKind, HEADER, LOG_EXTENSION};
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Offset-less local time written by older logs.
pub const LEGACY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Gigabytes per terabyte (binary units, matching the log's GB).
pub const GB_PER_TB: f64 = 1024.0;

/// Error type for savings aggregation
#[derive(Debug, Error)]
pub enum SavingsError {
    #[error("Failed to read event log {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to list log directory {path}: {source}")]
    ListDir { path: PathBuf, source: io::Error },
}

/// One parsed event log row
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub timestamp: DateTime<FixedOffset>,
    pub kind: EventKind,
    pub category: String,
    pub group: String,
    pub name: String,
    pub size_gb: f64,
}

impl LogRow {
    /// Parse one CSV row. Returns `None` for the header and malformed rows.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() || line == HEADER {
            return None;
        }

        let fields = split_csv(line)?;
        if fields.len() != 6 {
            return None;
        }

        Some(Self {
            timestamp: parse_timestamp(&fields[0])?,
            kind: EventKind::parse(&fields[1])?,
            category: fields[2].clone(),
            group: fields[3].clone(),
            name: fields[4].clone(),
            size_gb: fields[5].trim().parse().ok()?,
        })
    }

    pub fn common_name(&self) -> String {
        common_name(&self.name)
    }
}

/// Split a CSV line into fields, honouring double-quoted fields with `""` escapes
fn split_csv(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }

    if in_quotes {
        return None;
    }
    fields.push(field);
    Some(fields)
}

/// Accepts RFC 3339 timestamps and the legacy offset-less local format.
///
/// Legacy times that fall into a DST gap are rejected.
fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s).ok().or_else(|| {
        let naive = NaiveDateTime::parse_from_str(s, LEGACY_TIME_FORMAT).ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.fixed_offset())
    })
}

/// Savings for one completed item
#[derive(Debug, Clone, PartialEq)]
pub struct SavingsRecord {
    pub common_name: String,
    pub before_gb: f64,
    pub after_gb: f64,
    /// `before_gb - after_gb`
    pub savings_gb: f64,
    /// `savings_gb / before_gb`; zero when the source was empty
    pub savings_ratio: f64,
    pub elapsed_hours: f64,
    /// `None` when the end row is not after the start row
    pub savings_per_hour: Option<f64>,
}

impl SavingsRecord {
    pub fn from_pair(start: &LogRow, end: &LogRow) -> Self {
        let savings_gb = start.size_gb - end.size_gb;
        let savings_ratio = if start.size_gb > 0.0 {
            savings_gb / start.size_gb
        } else {
            0.0
        };
        let elapsed_hours = (end.timestamp - start.timestamp).num_seconds() as f64 / 3600.0;
        let savings_per_hour = (elapsed_hours > 0.0).then(|| savings_gb / elapsed_hours);

        Self {
            common_name: start.common_name(),
            before_gb: start.size_gb,
            after_gb: end.size_gb,
            savings_gb,
            savings_ratio,
            elapsed_hours,
            savings_per_hour,
        }
    }
}

/// Pair rows of a single log into savings records
///
/// A `start` is matched with the next `end` for the same common name.
/// Unmatched rows are ignored. Later pairs replace earlier ones for a name.
pub fn pair_rows(rows: &[LogRow]) -> Vec<SavingsRecord> {
    let mut pending: HashMap<String, &LogRow> = HashMap::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut records: Vec<SavingsRecord> = Vec::new();

    for row in rows {
        let name = row.common_name();
        match row.kind {
            EventKind::Start => {
                pending.insert(name, row);
            }
            EventKind::End => {
                let Some(start) = pending.remove(&name) else {
                    debug!(name = %name, "end row without start, ignoring");
                    continue;
                };
                let record = SavingsRecord::from_pair(start, row);
                match index.get(&name) {
                    Some(&i) => records[i] = record,
                    None => {
                        index.insert(name, records.len());
                        records.push(record);
                    }
                }
            }
        }
    }

    records
}

/// Parse every row of a log file, skipping malformed ones
pub fn rows_from_file(path: &Path) -> Result<Vec<LogRow>, SavingsError> {
    let content = fs::read_to_string(path).map_err(|source| SavingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut rows = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() || line == HEADER {
            continue;
        }
        match LogRow::parse(line) {
            Some(row) => rows.push(row),
            None => warn!(path = %path.display(), line = lineno + 1, "skipping malformed log row"),
        }
    }
    Ok(rows)
}

/// Savings records of one log file
pub fn records_from_file(path: &Path) -> Result<Vec<SavingsRecord>, SavingsError> {
    Ok(pair_rows(&rows_from_file(path)?))
}

/// Totals across all logs
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SavingsSummary {
    pub items: Vec<SavingsRecord>,
    pub total_savings_tb: f64,
    /// `None` when no items were paired
    pub mean_savings_ratio: Option<f64>,
    /// `None` when no item has a positive elapsed time
    pub mean_savings_per_hour: Option<f64>,
}

impl SavingsSummary {
    pub fn from_records(items: Vec<SavingsRecord>) -> Self {
        let total_gb: f64 = items.iter().map(|r| r.savings_gb).sum();
        let mean_savings_ratio = mean(items.iter().map(|r| r.savings_ratio));
        let mean_savings_per_hour = mean(items.iter().filter_map(|r| r.savings_per_hour));

        Self {
            total_savings_tb: total_gb / GB_PER_TB,
            mean_savings_ratio,
            mean_savings_per_hour,
            items,
        }
    }
}

impl fmt::Display for SavingsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total Storage Saved: {:.2} TB", self.total_savings_tb)?;
        writeln!(
            f,
            "Average Savings per Item: {:.2}%",
            self.mean_savings_ratio.unwrap_or(0.0) * 100.0
        )?;
        write!(
            f,
            "Average Savings per Hour: {:.2} GB/h",
            self.mean_savings_per_hour.unwrap_or(0.0)
        )
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Aggregate savings over the given log files
pub fn aggregate(paths: &[PathBuf]) -> Result<SavingsSummary, SavingsError> {
    let mut items = Vec::new();
    for path in paths {
        items.extend(records_from_file(path)?);
    }
    Ok(SavingsSummary::from_records(items))
}

/// Aggregate every `*.log` file in `log_dir`
pub fn aggregate_dir(log_dir: &Path) -> Result<SavingsSummary, SavingsError> {
    let list_err = |source| SavingsError::ListDir {
        path: log_dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(log_dir).map_err(list_err)? {
        let path = entry.map_err(list_err)?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == LOG_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();

    aggregate(&paths)
}
