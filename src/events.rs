//! Core event types for the log anomaly pipeline
//!
//! This module defines the [`LogEvent`] produced by the segmenter for every matched
//! span of lines, together with the shared timestamp type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Highest severity score an event can carry
pub const MAX_SEVERITY: u8 = 10;

/// A discrete anomaly cut out of a tailed log file
///
/// Created by the segmenter, enriched with tags, severity and identity, and then
/// handed by value to the correlator, the alert cache and the external sinks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEvent {
    /// Lines of the matched span, in file order
    pub raw_lines: Vec<String>,
    /// The span lines joined with `\n`
    pub raw_text: String,
    /// Timestamp found in the content, or the time the span was cut
    pub timestamp: Timestamp,
    /// Host that produced the log file
    pub host: String,
    /// Matched keywords in discovery order (duplicates allowed)
    pub tags: Vec<String>,
    /// Severity score, always within `0..=MAX_SEVERITY`
    pub severity_score: u8,
    /// Explicit or content-derived identifier, never empty
    pub event_id: String,
    /// Path of the file the span came from
    pub file_path: String,
    /// 1-based line number of the first span line within the scanned chunk
    pub line_number: usize,
    /// Lines surrounding the span (before, then after)
    pub context_lines: Vec<String>,
    /// Whether the span belongs to the cell-trace anomaly class
    pub is_cell_trace: bool,
}

impl LogEvent {
    /// File name component of `file_path`, handling both separator styles
    pub fn file_name(&self) -> &str {
        base_name(&self.file_path)
    }
}

/// Last component of a path written with `/` or `\` separators
pub fn base_name(path: &str) -> &str {
    let after_slash = path.rsplit('/').next().unwrap_or(path);
    after_slash.rsplit('\\').next().unwrap_or(after_slash)
}

/// Host name of this machine, `unknown` when it cannot be determined
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parent directory name of a path, if it has a meaningful one
pub fn parent_dir_name(path: &str) -> Option<&str> {
    Path::new(path)
        .parent()
        .and_then(|parent| parent.file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty() && *name != ".")
}
