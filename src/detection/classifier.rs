use crate::detection::rules::{PatternClass, RuleSet};
use crate::events::MAX_SEVERITY;
use std::sync::Arc;

const CELL_TRACE_BONUS: u32 = 3;
const STACK_BONUS: u32 = 2;
const CALL_TRACE_BONUS: u32 = 4;
const TASK_BLOCK_BONUS: u32 = 3;
const JSON_ERROR_BONUS: u32 = 3;
const HUNG_TASK_BONUS: u32 = 5;

/// Tags and severity computed for one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Matched keywords in discovery order
    pub tags: Vec<String>,
    /// Clamped severity score
    pub severity: u8,
}

/// Deterministic severity scorer
///
/// Evaluates an event's lines against the shared [`RuleSet`]. Scoring is a pure
/// function of the lines: keyword weights are summed, contextual bonuses are added,
/// and the result is floored at the strongest single keyword and capped at
/// [`MAX_SEVERITY`].
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Arc<RuleSet>,
}

impl Classifier {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    /// Tag and score the lines of one event
    pub fn classify(&self, lines: &[String]) -> Classification {
        let mut tags = Vec::new();
        let mut total: u32 = 0;
        let mut max_weight: u32 = 0;

        for line in lines {
            for keyword in self.rules.matching_keywords(line) {
                let weight = u32::from(self.rules.weight(keyword));
                total += weight;
                max_weight = max_weight.max(weight);
                tags.push(keyword.to_string());
            }
        }

        let text = lines.join(" ");
        let upper = text.to_uppercase();

        if self.rules.matches_class(&text, PatternClass::CellTrace) {
            total += CELL_TRACE_BONUS;
        }

        if upper.contains("STACK") || upper.contains("TRACEBACK") {
            total += STACK_BONUS;
        }

        if text.contains("Call Trace:") || upper.contains("CALL TRACE") {
            total += CALL_TRACE_BONUS;
        }

        if text.contains("<TASK>") && text.contains("</TASK>") {
            total += TASK_BLOCK_BONUS;
        }

        let error_terms = self
            .rules
            .error_vocabulary()
            .iter()
            .filter(|term| upper.contains(term.as_str()))
            .count() as u32;
        if error_terms > 1 {
            total += error_terms;
        }

        if text.contains("\"level\":\"error\"") || text.contains("\"error\":") {
            total += JSON_ERROR_BONUS;
        }

        if text.contains("blocked for more than") && text.contains("hung_task_timeout_secs") {
            total += HUNG_TASK_BONUS;
        }

        let severity = total.max(max_weight).min(u32::from(MAX_SEVERITY)) as u8;

        Classification { tags, severity }
    }
}
