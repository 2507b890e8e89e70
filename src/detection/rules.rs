//! Built-in detection tables
//!
//! The [`RuleSet`] bundles every table the segmenter and classifier consult: the
//! trigger keyword list, the per-keyword severity weights and the special anomaly
//! patterns. It is compiled once at startup and shared immutably.

use regex::Regex;
use std::collections::HashMap;

/// Keywords that open a span and become event tags
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "ERROR",
    "FAILED",
    "Failed",
    "Error",
    "fail",
    "error",
    "oom",
    "killed",
    "OOM",
    "KILLED",
    "Cell Trace",
    "Runtime Error",
    "Exception",
    "Panic",
    "Fatal",
    "Critical",
    "Timeout",
    "Connection refused",
    "OutOfMemory",
    "Segmentation fault",
    "core dumped",
    "Blocked for more than",
    "hung_task_timeout_secs",
];

/// Severity weight per upper-cased keyword
pub const DEFAULT_SEVERITY_WEIGHTS: &[(&str, u8)] = &[
    ("FATAL", 10),
    ("CRITICAL", 9),
    ("SEGMENTATION FAULT", 9),
    ("ERROR", 8),
    ("OOM", 8),
    ("OUTOFMEMORY", 8),
    ("CORE DUMPED", 8),
    ("BLOCKED FOR MORE THAN", 8),
    ("EXCEPTION", 7),
    ("PANIC", 7),
    ("KILLED", 6),
    ("CELL TRACE", 6),
    ("FAILED", 5),
    ("RUNTIME ERROR", 5),
    ("HUNG_TASK_TIMEOUT_SECS", 5),
    ("FAIL", 4),
    ("TIMEOUT", 4),
    ("CONNECTION REFUSED", 3),
];

/// Canonical error vocabulary counted for the multi-keyword bonus
pub const ERROR_VOCABULARY: &[&str] = &[
    "ERROR",
    "EXCEPTION",
    "FAILED",
    "FATAL",
    "SEGMENTATION FAULT",
    "CORE DUMPED",
    "CALL TRACE",
    "BLOCKED FOR MORE THAN",
];

/// Special anomaly patterns and the class they assign
pub const DEFAULT_SPECIAL_PATTERNS: &[(&str, PatternClass)] = &[
    (r"(?i)cell\s+trace.*error", PatternClass::CellTrace),
    (r"(?i)cell\s+trace.*exception", PatternClass::CellTrace),
    (r"(?i)cell\s+trace.*failed", PatternClass::CellTrace),
    (r"(?i)trace\s+id:\s*[a-zA-Z0-9-]+.*error", PatternClass::CellTrace),
    (r"(?i)call\s+trace", PatternClass::KernelTrace),
];

/// Classification assigned by a special pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternClass {
    /// Structured cell-trace exception
    CellTrace,
    /// Kernel call trace header
    KernelTrace,
}

/// A compiled special pattern
#[derive(Debug, Clone)]
pub struct SpecialPattern {
    pub regex: Regex,
    pub class: PatternClass,
}

/// Keyword with its upper-cased form precomputed for matching
#[derive(Debug, Clone)]
struct Keyword {
    text: String,
    upper: String,
}

/// Why a line opened a span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Line matched a special pattern
    Pattern(PatternClass),
    /// Line contained a trigger keyword
    Keyword,
    /// Line looked like a single-line JSON error record
    JsonError,
}

/// Immutable detection tables shared by the segmenter and classifier
#[derive(Debug, Clone)]
pub struct RuleSet {
    keywords: Vec<Keyword>,
    weights: HashMap<String, u8>,
    special_patterns: Vec<SpecialPattern>,
    error_vocabulary: Vec<String>,
}

impl RuleSet {
    /// Build a rule set from explicit tables
    ///
    /// # Errors
    ///
    /// Returns the regex error if any special pattern fails to compile.
    pub fn new(
        keywords: &[&str],
        weights: &[(&str, u8)],
        special_patterns: &[(&str, PatternClass)],
    ) -> Result<Self, regex::Error> {
        let special_patterns = special_patterns
            .iter()
            .map(|(pattern, class)| {
                Ok(SpecialPattern {
                    regex: Regex::new(pattern)?,
                    class: *class,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            keywords: keywords
                .iter()
                .map(|k| Keyword {
                    text: k.to_string(),
                    upper: k.to_uppercase(),
                })
                .collect(),
            weights: weights
                .iter()
                .map(|(k, w)| (k.to_uppercase(), *w))
                .collect(),
            special_patterns,
            error_vocabulary: ERROR_VOCABULARY.iter().map(|k| k.to_string()).collect(),
        })
    }

    /// Build the rule set from the built-in tables
    pub fn with_defaults() -> Self {
        Self::new(
            DEFAULT_KEYWORDS,
            DEFAULT_SEVERITY_WEIGHTS,
            DEFAULT_SPECIAL_PATTERNS,
        )
        .expect("built-in special patterns must compile")
    }

    /// Keywords contained in `line`, compared case-insensitively, in table order
    pub fn matching_keywords<'a>(&'a self, line: &str) -> impl Iterator<Item = &'a str> + 'a {
        let upper = line.to_uppercase();
        self.keywords
            .iter()
            .filter(move |k| upper.contains(&k.upper))
            .map(|k| k.text.as_str())
    }

    /// Severity weight of a keyword, 0 when it has none
    pub fn weight(&self, keyword: &str) -> u8 {
        self.weights
            .get(&keyword.to_uppercase())
            .copied()
            .unwrap_or(0)
    }

    /// The canonical error vocabulary, upper-cased
    pub fn error_vocabulary(&self) -> &[String] {
        &self.error_vocabulary
    }

    /// First special pattern class matching `text`
    pub fn pattern_class(&self, text: &str) -> Option<PatternClass> {
        self.special_patterns
            .iter()
            .find(|p| p.regex.is_match(text))
            .map(|p| p.class)
    }

    /// Whether any pattern of the given class matches `text`
    pub fn matches_class(&self, text: &str, class: PatternClass) -> bool {
        self.special_patterns
            .iter()
            .any(|p| p.class == class && p.regex.is_match(text))
    }

    /// Decide whether `line` opens a new span
    ///
    /// Cell-trace patterns take precedence over keywords so the span is classified
    /// correctly; the JSON heuristic is the last resort. With the default keywords it
    /// is covered by the `error` keyword and only fires for tables without one.
    pub fn trigger(&self, line: &str) -> Option<TriggerKind> {
        if self.matches_class(line, PatternClass::CellTrace) {
            return Some(TriggerKind::Pattern(PatternClass::CellTrace));
        }
        if self.matching_keywords(line).next().is_some() {
            return Some(TriggerKind::Keyword);
        }
        if let Some(class) = self.pattern_class(line) {
            return Some(TriggerKind::Pattern(class));
        }
        if looks_like_json_error(line) {
            return Some(TriggerKind::JsonError);
        }
        None
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Single-line structured record that mentions an error
pub fn looks_like_json_error(line: &str) -> bool {
    line.trim_start().starts_with('{') && line.to_lowercase().contains("error")
}
