//! Event identity and content normalization
//!
//! An event carries an explicit identifier when its text names one (trace, request,
//! session, correlation or transaction id, a long bracketed token, or a UUID). When it
//! does not, the identifier is derived from the normalized content so that repeats of the
//! same message with different timestamps or counters collapse onto one id.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Shortest explicit identifier accepted before falling back to the next attempt
pub const MIN_ID_LEN: usize = 6;

const ID_MARKERS: &[&str] = &["trace", "request", "session", "correlation", "transaction"];

static MARKER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ID_MARKERS
        .iter()
        .map(|name| {
            Regex::new(&format!(
                r#"(?i)\b{name}[_-]?id["']?\s*[:=]\s*["']?([^\s"',;\]\)\}}>]+)"#
            ))
            .expect("identifier marker pattern must compile")
        })
        .collect()
});

static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\[\]\s]{8,})\]").unwrap());

static UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b")
        .unwrap()
});

static TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
        r"|\d{2}/\d{2}/\d{4} \d{2}:\d{2}:\d{2}",
        r"|\b[A-Z][a-z]{2} +\d{1,2} \d{2}:\d{2}:\d{2}",
    ))
    .unwrap()
});

static TIMESTAMP_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2})?(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?)?$|^\d{2}:\d{2}:\d{2}(?:[.,]\d+)?$")
        .unwrap()
});

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+\b").unwrap());

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Normalize content so cosmetic differences do not change identity
///
/// Timestamps are removed, standalone digit runs become `NUMBER`, and the result is
/// lower-cased with whitespace collapsed and trimmed.
pub fn normalize_content(text: &str) -> String {
    let without_time = TIMESTAMP.replace_all(text, "");
    let without_digits = DIGIT_RUN.replace_all(&without_time, "NUMBER");
    let lowered = without_digits.to_lowercase();
    WHITESPACE.replace_all(&lowered, " ").trim().to_string()
}

/// Hex SHA-256 of the input
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Hex SHA-256 of the normalized content
pub fn content_hash(text: &str) -> String {
    sha256_hex(&normalize_content(text))
}

/// Derives stable event identifiers
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityResolver;

impl IdentityResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the identifier of an event from its joined text
    ///
    /// # Returns
    ///
    /// The first explicit identifier of at least [`MIN_ID_LEN`] characters, or the
    /// content hash when none is present. Never empty.
    pub fn resolve(&self, text: &str) -> String {
        explicit_id(text).unwrap_or_else(|| content_hash(text))
    }
}

fn explicit_id(text: &str) -> Option<String> {
    let markers = MARKER_PATTERNS
        .iter()
        .flat_map(|re| re.captures_iter(text))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str());

    let bracketed = BRACKETED
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|token| !TIMESTAMP_TOKEN.is_match(token));

    let uuids = UUID.find_iter(text).map(|m| m.as_str());

    markers
        .chain(bracketed)
        .chain(uuids)
        .find(|candidate| candidate.chars().count() >= MIN_ID_LEN)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_variants() {
        let resolver = IdentityResolver::new();
        assert_eq!(resolver.resolve("ERROR TraceID: abc123 failed"), "abc123");
        assert_eq!(resolver.resolve("trace_id=abc123 timeout"), "abc123");
        assert_eq!(resolver.resolve("trace-id: abc123"), "abc123");
        assert_eq!(resolver.resolve(r#"{"traceId":"abc123","error":"x"}"#), "abc123");
    }

    #[test]
    fn test_marker_order() {
        let resolver = IdentityResolver::new();
        let text = "request_id=req-000042 trace_id=trc-000001";
        assert_eq!(resolver.resolve(text), "trc-000001");
    }

    #[test]
    fn test_request_and_session_ids() {
        let resolver = IdentityResolver::new();
        assert_eq!(resolver.resolve("requestId: r-778899 failed"), "r-778899");
        assert_eq!(resolver.resolve("session_id=sess9911 expired"), "sess9911");
    }

    #[test]
    fn test_short_candidates_are_skipped() {
        let resolver = IdentityResolver::new();
        let text = "trace_id=ab1 error [worker-pool-7]";
        assert_eq!(resolver.resolve(text), "worker-pool-7");
    }

    #[test]
    fn test_bracketed_timestamp_is_not_an_id() {
        let resolver = IdentityResolver::new();
        let text = "[2024-01-01T10:00:00Z] ERROR something broke";
        assert_eq!(resolver.resolve(text), content_hash(text));
    }

    #[test]
    fn test_uuid_fallback() {
        let resolver = IdentityResolver::new();
        let text = "job 550e8400-e29b-41d4-a716-446655440000 failed";
        assert_eq!(resolver.resolve(text), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn test_timestamp_and_pid_share_identifier() {
        let resolver = IdentityResolver::new();
        let a = resolver.resolve("2024-01-01 10:00:00 worker[1234]: ERROR disk full");
        let b = resolver.resolve("2024-03-09 23:59:59 worker[98765]: ERROR disk full");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_normalize_content() {
        assert_eq!(
            normalize_content("2024-01-01T10:00:00.123Z  ERROR   retry 3 of 5"),
            "error retry number of number"
        );
        assert_eq!(
            normalize_content("Jan  5 10:00:00 host kernel: oom"),
            "host kernel: oom"
        );
        assert_eq!(normalize_content("pid=42abc"), "pid=42abc");
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("Error 1"), content_hash("error   2"));
        assert_ne!(content_hash("error disk"), content_hash("error net"));
    }
}
