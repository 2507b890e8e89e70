//! Search-index document built from a processed event
//!
//! Besides the event fields the record carries a few derived fields that make the
//! index easier to query: a coarse error category, the component that logged it, the
//! stack frames found in the span and a one-line remediation hint from the analysis.

use crate::events::{base_name, parent_dir_name, LogEvent, Timestamp};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Ordered error categories; the first category with a matching marker wins
const ERROR_CATEGORIES: &[(&str, &[&str])] = &[
    ("MEMORY_ERROR", &["OOM", "OUTOFMEMORY", "MEMORY", "HEAP"]),
    ("NETWORK_ERROR", &["CONNECTION REFUSED", "TIMEOUT", "NETWORK", "SOCKET"]),
    ("DATABASE_ERROR", &["SQL", "DATABASE", "CONNECTION POOL", "DEADLOCK"]),
    ("AUTHENTICATION", &["AUTH", "LOGIN", "PERMISSION", "UNAUTHORIZED"]),
    ("CELL_TRACE", &["CELL TRACE", "TRACE ID"]),
    ("RUNTIME_ERROR", &["RUNTIME", "EXCEPTION", "PANIC", "FATAL"]),
    ("IO_ERROR", &["FILE", "DISK", "READ", "WRITE"]),
    ("CONFIGURATION", &["CONFIG", "PROPERTY", "SETTING"]),
    ("APPLICATION", &["ERROR", "FAILED"]),
];

const STACK_MARKERS: &[&str] = &[
    "at ",
    "Caused by",
    "Exception in thread",
    "Traceback",
    "File \"",
];

const SUGGESTION_KEYWORDS: &[&str] = &[
    "suggest",
    "recommend",
    "fix",
    "solve",
    "resolve",
    "建议",
    "解决",
    "修复",
    "处理",
];

const SUMMARY_CHARS: usize = 100;

static COMPONENT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\[(\w+)\]",
        r"(?i)(\w+)\s*:\s*error",
        r"(?i)class\s+(\w+\.\w+)",
        r"(?i)service\s+(\w+)",
        r"(?i)module\s+(\w+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("component pattern"))
    .collect()
});

/// Document written to the search index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRecord {
    pub event_id: String,
    #[serde(rename = "@timestamp")]
    pub timestamp: Timestamp,
    pub host: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_lines: Vec<String>,
    pub severity_score: u8,
    pub ai_result: String,
    pub file_path: String,
    pub line_number: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_lines: Vec<String>,
    pub is_cell_trace: bool,
    pub error_type: String,
    pub component: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack_trace: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub suggestion: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_events: Vec<String>,
    pub processed_at: Timestamp,
}

impl IndexRecord {
    /// Build the record for an analyzed event
    ///
    /// # Arguments
    ///
    /// * `event` - The event as it left the correlator
    /// * `analysis` - Analysis text, possibly empty
    /// * `related_events` - Ids of earlier events the correlator linked to this one
    /// * `processed_at` - Processing time
    pub fn from_event(
        event: &LogEvent,
        analysis: &str,
        related_events: Vec<String>,
        processed_at: Timestamp,
    ) -> Self {
        Self {
            event_id: event.event_id.clone(),
            timestamp: event.timestamp,
            host: event.host.clone(),
            tags: event.tags.clone(),
            content: event.raw_text.clone(),
            raw_lines: event.raw_lines.clone(),
            severity_score: event.severity_score,
            ai_result: analysis.to_string(),
            file_path: event.file_path.clone(),
            line_number: event.line_number,
            context_lines: event.context_lines.clone(),
            is_cell_trace: event.is_cell_trace,
            error_type: extract_error_type(&event.raw_text, &event.tags).to_string(),
            component: extract_component(&event.file_path, &event.raw_text),
            stack_trace: extract_stack_trace(&event.raw_lines),
            suggestion: extract_suggestion(analysis),
            related_events,
            processed_at,
        }
    }
}

fn category_of(text: &str) -> Option<&'static str> {
    let upper = text.to_uppercase();
    ERROR_CATEGORIES
        .iter()
        .find(|(_, markers)| markers.iter().any(|m| upper.contains(m)))
        .map(|(category, _)| *category)
}

/// Coarse error category of the content, falling back to the tags
pub fn extract_error_type(content: &str, tags: &[String]) -> &'static str {
    category_of(content)
        .or_else(|| tags.iter().find_map(|tag| category_of(tag)))
        .unwrap_or("UNKNOWN")
}

/// Component that produced the log
///
/// Taken from the parent directory when it names something, else the file stem.
/// Without a path the content is searched for bracketed or labelled names.
pub fn extract_component(file_path: &str, content: &str) -> String {
    if !file_path.is_empty() {
        if let Some(dir) = parent_dir_name(file_path).filter(|d| *d != "/") {
            return dir.to_string();
        }
        let file = base_name(file_path);
        return match file.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => file.to_string(),
        };
    }

    COMPONENT_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(content))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "SYSTEM".to_string())
}

/// Stack frames and exception headers found among the span lines
pub fn extract_stack_trace(raw_lines: &[String]) -> Vec<String> {
    raw_lines
        .iter()
        .filter(|line| {
            let indented = line.starts_with('\t') || line.starts_with("    ");
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return false;
            }
            STACK_MARKERS.iter().any(|m| trimmed.contains(m))
                || (indented && trimmed.contains('.') && (trimmed.contains('(') || trimmed.contains(':')))
        })
        .map(|line| line.trim().to_string())
        .collect()
}

/// First analysis line that reads like a remediation, else a short summary
pub fn extract_suggestion(analysis: &str) -> String {
    if analysis.is_empty() {
        return String::new();
    }

    let hint = analysis.lines().map(str::trim).find(|line| {
        let lower = line.to_lowercase();
        SUGGESTION_KEYWORDS.iter().any(|k| lower.contains(k))
    });
    if let Some(line) = hint {
        return line.to_string();
    }

    if analysis.chars().count() > SUMMARY_CHARS {
        let summary: String = analysis.chars().take(SUMMARY_CHARS).collect();
        format!("{}...", summary)
    } else {
        analysis.to_string()
    }
}
