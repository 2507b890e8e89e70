use crate::detection::{Classifier, IdentityResolver, PatternClass, RuleSet};
use crate::events::{LogEvent, Timestamp};
use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

static REGISTER_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:RIP|RSP|RAX|RBX|RCX|RDX|RSI|RDI|RBP|R0[89]|R1[0-5]|EFLAGS):").unwrap()
});

static LEADING_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?").unwrap()
});

const PACKAGE_TOKENS: &[&str] = &["java.", "javax.", "org.", "com."];

/// Continuation rules for an open span, fixed by its first line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpanKind {
    Generic,
    KernelTrace,
    CellTrace,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Idle,
    Collecting { start: usize, kind: SpanKind },
}

/// Half-open range of buffer indices forming one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
    kind: SpanKind,
}

/// Cuts a buffer of lines into multi-line anomaly events
///
/// The segmenter walks the lines with a two-state machine. While idle, a line that
/// matches a keyword, a special pattern or the JSON error heuristic opens a span.
/// While collecting, continuation lines (stack frames, kernel trace bodies, cell-trace
/// details) extend the span; the first line that does not belong closes it and is
/// evaluated again as a potential trigger.
///
/// Each emitted event is classified and given an identifier before it is returned.
#[derive(Debug, Clone)]
pub struct Segmenter {
    rules: Arc<RuleSet>,
    classifier: Classifier,
    identity: IdentityResolver,
    host: String,
    context_lines: usize,
}

impl Segmenter {
    /// Create a segmenter
    ///
    /// # Arguments
    ///
    /// * `rules` - Shared detection tables
    /// * `host` - Host name stamped on every event
    /// * `context_lines` - Lines of context captured on each side of a span
    pub fn new(rules: Arc<RuleSet>, host: impl Into<String>, context_lines: usize) -> Self {
        Self {
            classifier: Classifier::new(Arc::clone(&rules)),
            rules,
            identity: IdentityResolver::new(),
            host: host.into(),
            context_lines,
        }
    }

    pub fn context_lines(&self) -> usize {
        self.context_lines
    }

    /// Segment the lines read from `file_path` into events
    pub fn segment(&self, file_path: &str, lines: &[String]) -> Vec<LogEvent> {
        self.segment_at(file_path, lines, Utc::now())
    }

    /// Segment with an explicit fallback timestamp (useful for testing)
    ///
    /// Events whose first line carries no parseable timestamp are stamped with `now`.
    pub fn segment_at(&self, file_path: &str, lines: &[String], now: Timestamp) -> Vec<LogEvent> {
        let events: Vec<LogEvent> = self
            .find_spans(lines)
            .into_iter()
            .map(|span| self.build_event(file_path, lines, span, now))
            .collect();

        if !events.is_empty() {
            debug!(
                "Segmented {} event(s) from {} line(s) of {}",
                events.len(),
                lines.len(),
                file_path
            );
        }
        events
    }

    fn find_spans(&self, lines: &[String]) -> Vec<Span> {
        let mut spans = Vec::new();
        let mut state = State::Idle;
        let mut i = 0;

        while i < lines.len() {
            let line = &lines[i];
            match state {
                State::Idle => {
                    if self.rules.trigger(line).is_some() {
                        state = State::Collecting {
                            start: i,
                            kind: self.span_kind(line),
                        };
                    }
                    i += 1;
                }
                State::Collecting { start, kind } => {
                    if continues_span(line, kind) {
                        i += 1;
                    } else {
                        // Close without advancing so the line is re-evaluated while idle
                        spans.push(Span { start, end: i, kind });
                        state = State::Idle;
                    }
                }
            }
        }

        if let State::Collecting { start, kind } = state {
            spans.push(Span {
                start,
                end: lines.len(),
                kind,
            });
        }

        spans
    }

    fn span_kind(&self, first_line: &str) -> SpanKind {
        if self.rules.matches_class(first_line, PatternClass::CellTrace) {
            SpanKind::CellTrace
        } else if self.rules.matches_class(first_line, PatternClass::KernelTrace) {
            SpanKind::KernelTrace
        } else {
            SpanKind::Generic
        }
    }

    fn build_event(&self, file_path: &str, lines: &[String], span: Span, now: Timestamp) -> LogEvent {
        let raw_lines = lines[span.start..span.end].to_vec();
        let raw_text = raw_lines.join("\n");

        let before = span.start.saturating_sub(self.context_lines);
        let after = (span.end + self.context_lines).min(lines.len());
        let context_lines = lines[before..span.start]
            .iter()
            .chain(lines[span.end..after].iter())
            .cloned()
            .collect();

        let classification = self.classifier.classify(&raw_lines);
        let event_id = self.identity.resolve(&raw_text);
        let timestamp = raw_lines
            .first()
            .and_then(|line| extract_timestamp(line))
            .unwrap_or(now);

        LogEvent {
            raw_text,
            timestamp,
            host: self.host.clone(),
            tags: classification.tags,
            severity_score: classification.severity,
            event_id,
            file_path: file_path.to_string(),
            line_number: span.start + 1,
            context_lines,
            is_cell_trace: span.kind == SpanKind::CellTrace,
            raw_lines,
        }
    }
}

fn continues_span(line: &str, kind: SpanKind) -> bool {
    if line.trim().is_empty() {
        return false;
    }
    if is_stack_line(line) {
        return true;
    }
    match kind {
        SpanKind::Generic => false,
        SpanKind::KernelTrace => is_kernel_trace_line(line),
        SpanKind::CellTrace => is_cell_trace_line(line),
    }
}

/// Stack frame or exception chain line from a managed runtime
fn is_stack_line(line: &str) -> bool {
    if line.contains("at ")
        || line.contains("Caused by")
        || line.contains("Exception in thread")
        || line.contains("Traceback")
        || line.contains("File \"")
    {
        return true;
    }
    let indented = line.starts_with('\t') || line.starts_with("    ");
    indented && PACKAGE_TOKENS.iter().any(|token| line.contains(token))
}

/// Body line of a kernel call trace
fn is_kernel_trace_line(line: &str) -> bool {
    line.contains("<TASK>")
        || line.contains("</TASK>")
        || REGISTER_MARKER.is_match(line)
        || (line.contains("+0x") && line.contains('/'))
        || (line.contains(':') && (line.contains("0x") || line.contains("ffff")))
}

fn is_cell_trace_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("trace") || lower.contains("cell") || line.contains(':')
}

/// Parse the first ISO-8601 style timestamp found in `line`
///
/// Timestamps without an offset are taken as UTC.
pub fn extract_timestamp(line: &str) -> Option<Timestamp> {
    let found = LEADING_TIMESTAMP.find(line)?.as_str();
    let candidate = found.replacen(' ', "T", 1).replace(',', ".");

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&candidate) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(&candidate, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&candidate, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
