//! Per-signature alert aggregation
//!
//! Repeats of the same anomaly are folded into one [`AggregatedAlert`] keyed by host,
//! file name and normalized content. Near-duplicates that the normalizer misses are
//! merged by fuzzy similarity. Whether an update should produce a notification is
//! decided by the [`SendPolicy`]. The cache only decides; a delivery is recorded
//! through [`AlertCache::mark_sent`] once it has actually happened.

use crate::aggregator::similarity::{is_similar, similarity_percent};
use crate::alerts::send_policy::SendPolicy;
use crate::detection::content_hash;
use crate::events::{base_name, LogEvent, Timestamp};
use chrono::{Duration, Utc};
use log::debug;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Most context lines kept on an aggregate
pub const MAX_CONTEXT_LINES: usize = 20;

/// Minimum similarity, in percent, for a fuzzy merge
pub const FUZZY_MERGE_THRESHOLD: f64 = 90.0;

/// Repeated occurrences of one anomaly folded together
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedAlert {
    pub key: String,
    pub event_id: String,
    pub host: String,
    /// Highest severity seen
    pub max_severity: u8,
    pub count: u64,
    /// Sum of the severities of every occurrence
    pub cumulative_severity: u64,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    /// Last time a notification was delivered for this aggregate
    pub last_sent_at: Option<Timestamp>,
    /// Text of the latest occurrence
    pub content: String,
    /// Analysis attached to the latest occurrence
    pub analysis: String,
    pub is_cell_trace: bool,
    pub file_path: String,
    pub context_lines: Vec<String>,
}

/// Outcome of recording an occurrence
#[derive(Debug, Clone)]
pub struct AlertDecision {
    /// Whether a notification should be sent now
    pub send: bool,
    /// Snapshot of the aggregate after the update
    pub alert: AggregatedAlert,
}

/// TTL-bounded cache of aggregated alerts
pub struct AlertCache {
    entries: Mutex<HashMap<String, AggregatedAlert>>,
    ttl: Duration,
    policy: SendPolicy,
}

impl AlertCache {
    /// Create a cache with the default send policy
    pub fn new(ttl: Duration) -> Self {
        Self::with_policy(ttl, SendPolicy::default())
    }

    pub fn with_policy(ttl: Duration, policy: SendPolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            policy,
        }
    }

    /// Record an occurrence now
    pub fn add_or_update(&self, event: &LogEvent, analysis: &str) -> AlertDecision {
        self.add_or_update_at(event, analysis, Utc::now())
    }

    /// Record an occurrence at a specific time (useful for testing)
    ///
    /// Looks the event up by exact key, then by fuzzy similarity among aggregates from
    /// the same host and file, and creates a new aggregate when neither matches. The
    /// lookup and the insert happen under one lock. `last_sent_at` is left untouched.
    pub fn add_or_update_at(&self, event: &LogEvent, analysis: &str, now: Timestamp) -> AlertDecision {
        let key = alert_key(event);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let existing_key = if entries.contains_key(&key) {
            Some(key.clone())
        } else {
            closest_match(&entries, event)
        };

        if let Some(agg) = existing_key.as_ref().and_then(|k| entries.get_mut(k)) {
            if agg.key != key {
                debug!("Merging {} into similar alert {}", key, agg.key);
            }
            let send = self.update(agg, event, analysis, now);
            return AlertDecision {
                send,
                alert: agg.clone(),
            };
        }

        let send = self
            .policy
            .should_send_new(event.severity_score, event.is_cell_trace);
        let alert = AggregatedAlert {
            key: key.clone(),
            event_id: event.event_id.clone(),
            host: event.host.clone(),
            max_severity: event.severity_score,
            count: 1,
            cumulative_severity: u64::from(event.severity_score),
            first_seen: now,
            last_seen: now,
            last_sent_at: None,
            content: event.raw_text.clone(),
            analysis: analysis.to_string(),
            is_cell_trace: event.is_cell_trace,
            file_path: event.file_path.clone(),
            context_lines: merge_context_lines(&[], &event.context_lines),
        };
        entries.insert(key, alert.clone());

        AlertDecision { send, alert }
    }

    fn update(&self, agg: &mut AggregatedAlert, event: &LogEvent, analysis: &str, now: Timestamp) -> bool {
        agg.count += 1;
        agg.last_seen = now;
        agg.max_severity = agg.max_severity.max(event.severity_score);
        agg.cumulative_severity += u64::from(event.severity_score);
        agg.content = event.raw_text.clone();
        agg.analysis = analysis.to_string();
        agg.context_lines = merge_context_lines(&agg.context_lines, &event.context_lines);

        let reference = agg.last_sent_at.unwrap_or(agg.first_seen);
        let mut send = self
            .policy
            .should_send_repeat(event.severity_score, agg.count, now - reference);

        // Nothing delivered yet: an aggregate that qualified as new is still owed one
        if agg.last_sent_at.is_none()
            && self
                .policy
                .should_send_new(event.severity_score, event.is_cell_trace)
        {
            send = true;
        }

        if event.is_cell_trace && !agg.is_cell_trace {
            agg.is_cell_trace = true;
            send = true;
        }

        send
    }

    /// Record that a notification for the aggregate `key` was delivered at `at`
    ///
    /// # Returns
    ///
    /// `false` when the aggregate no longer exists
    pub fn mark_sent(&self, key: &str, at: Timestamp) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(key) {
            Some(agg) => {
                if agg.last_sent_at.map_or(true, |sent| sent < at) {
                    agg.last_sent_at = Some(at);
                }
                true
            }
            None => false,
        }
    }

    /// Drop aggregates idle longer than the TTL
    ///
    /// # Returns
    ///
    /// Number of aggregates removed
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now())
    }

    pub fn cleanup_at(&self, now: Timestamp) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, agg| now - agg.last_seen <= self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<AggregatedAlert> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }
}

/// Most similar aggregate from the same host and file, if any clears the threshold
///
/// Ties go to the aggregate seen first, then to the smaller key.
fn closest_match(entries: &HashMap<String, AggregatedAlert>, event: &LogEvent) -> Option<String> {
    entries
        .values()
        .filter(|agg| agg.host == event.host && agg.file_path == event.file_path)
        .filter(|agg| is_similar(&agg.content, &event.raw_text, FUZZY_MERGE_THRESHOLD))
        .map(|agg| (similarity_percent(&agg.content, &event.raw_text), agg))
        .max_by(|(sim_a, a), (sim_b, b)| {
            sim_a
                .total_cmp(sim_b)
                .then_with(|| b.first_seen.cmp(&a.first_seen))
                .then_with(|| b.key.cmp(&a.key))
        })
        .map(|(_, agg)| agg.key.clone())
}

/// Aggregation key for an event
pub fn alert_key(event: &LogEvent) -> String {
    let key = format!(
        "{}-{}-{}",
        event.host,
        base_name(&event.file_path),
        content_hash(&event.raw_text)
    );
    if event.is_cell_trace {
        format!("cell-trace-{}", key)
    } else {
        key
    }
}

/// Union of two context line lists, order preserved, capped at [`MAX_CONTEXT_LINES`]
pub fn merge_context_lines(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    existing
        .iter()
        .chain(incoming.iter())
        .filter(|line| seen.insert(line.as_str()))
        .take(MAX_CONTEXT_LINES)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(text: &str, severity: u8) -> LogEvent {
        LogEvent {
            raw_lines: vec![text.to_string()],
            raw_text: text.to_string(),
            timestamp: Utc::now(),
            host: "web-01".to_string(),
            tags: vec![],
            severity_score: severity,
            event_id: "evt-000001".to_string(),
            file_path: "/var/log/app/server.log".to_string(),
            line_number: 1,
            context_lines: vec![],
            is_cell_trace: false,
        }
    }

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_alert_key_format() {
        let mut e = event("ERROR disk full", 8);
        let key = alert_key(&e);
        assert!(key.starts_with("web-01-server.log-"));
        assert_eq!(key.len(), "web-01-server.log-".len() + 64);

        e.is_cell_trace = true;
        assert!(alert_key(&e).starts_with("cell-trace-web-01-server.log-"));
    }

    /// Record an occurrence and mark it delivered when the cache asks for a send
    fn record(cache: &AlertCache, e: &LogEvent, at: Timestamp) -> AlertDecision {
        let decision = cache.add_or_update_at(e, "", at);
        if decision.send {
            cache.mark_sent(&decision.alert.key, at);
        }
        decision
    }

    #[test]
    fn test_five_high_severity_occurrences() {
        let cache = AlertCache::new(Duration::minutes(30));
        let e = event("FATAL database unreachable", 9);

        let sends: Vec<bool> = [0, 1, 2, 3]
            .iter()
            .map(|m| record(&cache, &e, t0() + Duration::minutes(*m)).send)
            .collect();
        assert_eq!(sends, vec![true, true, true, false]);

        // Fifth arrives 4 minutes after the third (last actual) send
        assert!(!record(&cache, &e, t0() + Duration::minutes(6)).send);
        // Sixth arrives 5 minutes after it
        let decision = record(&cache, &e, t0() + Duration::minutes(7));
        assert!(decision.send);
        assert_eq!(decision.alert.count, 6);
        assert_eq!(
            cache.get(&decision.alert.key).unwrap().last_sent_at,
            Some(t0() + Duration::minutes(7))
        );
    }

    #[test]
    fn test_fifth_occurrence_after_interval_sends() {
        let cache = AlertCache::new(Duration::minutes(30));
        let e = event("FATAL database unreachable", 9);
        for m in 0..3 {
            assert!(record(&cache, &e, t0() + Duration::minutes(m)).send);
        }
        assert!(!record(&cache, &e, t0() + Duration::minutes(3)).send);
        assert!(record(&cache, &e, t0() + Duration::minutes(7)).send);
    }

    #[test]
    fn test_decision_does_not_stamp_last_sent() {
        let cache = AlertCache::new(Duration::minutes(30));
        let e = event("FATAL database unreachable", 9);
        for m in 0..3 {
            record(&cache, &e, t0() + Duration::minutes(m));
        }

        // Decided at +7m but never delivered
        let undelivered = cache.add_or_update_at(&e, "", t0() + Duration::minutes(7));
        assert!(undelivered.send);
        assert_eq!(undelivered.alert.last_sent_at, Some(t0() + Duration::minutes(2)));

        // Six minutes after the last actual send
        assert!(record(&cache, &e, t0() + Duration::minutes(8)).send);
    }

    #[test]
    fn test_undelivered_new_alert_is_owed_a_send() {
        let cache = AlertCache::new(Duration::minutes(30));
        let mut e = event("Cell Trace: attach failed", 2);
        e.is_cell_trace = true;

        assert!(cache.add_or_update_at(&e, "", t0()).send);
        let retry = record(&cache, &e, t0() + Duration::seconds(30));
        assert!(retry.send);

        // Delivered now, so the low-severity cadence applies again
        assert!(!record(&cache, &e, t0() + Duration::minutes(1)).send);
    }

    #[test]
    fn test_mark_sent_keeps_latest_and_ignores_unknown_keys() {
        let cache = AlertCache::new(Duration::minutes(30));
        let decision = cache.add_or_update_at(&event("ERROR disk full", 8), "", t0());
        let key = decision.alert.key;

        assert!(cache.mark_sent(&key, t0() + Duration::minutes(2)));
        assert!(cache.mark_sent(&key, t0() + Duration::minutes(1)));
        assert_eq!(cache.get(&key).unwrap().last_sent_at, Some(t0() + Duration::minutes(2)));
        assert!(!cache.mark_sent("missing", t0()));
    }

    #[test]
    fn test_aggregate_accumulates() {
        let cache = AlertCache::new(Duration::minutes(30));
        let mut first = event("ERROR retry 1 failed", 5);
        first.context_lines = vec!["a".to_string(), "b".to_string()];
        let mut second = event("ERROR retry 2 failed", 8);
        second.context_lines = vec!["b".to_string(), "c".to_string()];

        cache.add_or_update_at(&first, "first analysis", t0());
        let decision = cache.add_or_update_at(&second, "second analysis", t0() + Duration::seconds(5));

        let alert = decision.alert;
        assert_eq!(cache.len(), 1);
        assert_eq!(alert.count, 2);
        assert_eq!(alert.max_severity, 8);
        assert_eq!(alert.cumulative_severity, 13);
        assert_eq!(alert.content, "ERROR retry 2 failed");
        assert_eq!(alert.analysis, "second analysis");
        assert_eq!(alert.context_lines, vec!["a", "b", "c"]);
        assert_eq!(alert.first_seen, t0());
    }

    #[test]
    fn test_fuzzy_merge_of_near_duplicates() {
        let cache = AlertCache::new(Duration::minutes(30));
        let a = event("session a81f9c2e expired unexpectedly for tenant acme-corp", 6);
        let b = event("session a81f9c2f expired unexpectedly for tenant acme-corp", 6);
        assert_ne!(alert_key(&a), alert_key(&b));

        cache.add_or_update_at(&a, "", t0());
        let decision = cache.add_or_update_at(&b, "", t0() + Duration::seconds(1));

        assert_eq!(cache.len(), 1);
        assert_eq!(decision.alert.count, 2);
        assert_eq!(decision.alert.key, alert_key(&a));
    }

    const BASE: &str = "abcdefghijklmnopqrstuvwxyzabcdefghijklmnopqrstuvwx";

    /// `BASE` with the given byte range overwritten by `#`
    fn masked(range: std::ops::Range<usize>) -> String {
        let mut text = BASE.to_string();
        text.replace_range(range.clone(), &"#".repeat(range.len()));
        text
    }

    #[test]
    fn test_fuzzy_merge_prefers_closest_aggregate() {
        let cache = AlertCache::new(Duration::minutes(30));
        let farther = event(&masked(0..4), 6);
        let closer = event(&masked(48..50), 6);
        cache.add_or_update_at(&farther, "", t0());
        cache.add_or_update_at(&closer, "", t0() + Duration::seconds(1));
        assert_eq!(cache.len(), 2);

        let decision = cache.add_or_update_at(&event(BASE, 6), "", t0() + Duration::seconds(2));
        assert_eq!(decision.alert.key, alert_key(&closer));
        assert_eq!(decision.alert.count, 2);
    }

    #[test]
    fn test_fuzzy_merge_tie_goes_to_earliest() {
        let cache = AlertCache::new(Duration::minutes(30));
        let newer = event(&masked(46..50), 6);
        let older = event(&masked(0..4), 6);
        cache.add_or_update_at(&older, "", t0());
        cache.add_or_update_at(&newer, "", t0() + Duration::seconds(1));
        assert_eq!(cache.len(), 2);

        for _ in 0..5 {
            let decision = cache.add_or_update_at(&event(BASE, 6), "", t0() + Duration::seconds(2));
            assert_eq!(decision.alert.key, alert_key(&older));
        }
    }

    #[test]
    fn test_no_fuzzy_merge_across_files() {
        let cache = AlertCache::new(Duration::minutes(30));
        let a = event("session a81f9c2e expired unexpectedly for tenant acme-corp", 6);
        let mut b = event("session a81f9c2f expired unexpectedly for tenant acme-corp", 6);
        b.file_path = "/var/log/app/worker.log".to_string();

        cache.add_or_update_at(&a, "", t0());
        cache.add_or_update_at(&b, "", t0());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_low_severity_new_aggregate() {
        let cache = AlertCache::new(Duration::minutes(30));
        let e = event("slow request", 2);
        let decision = cache.add_or_update_at(&e, "", t0());
        assert!(!decision.send);
        assert_eq!(decision.alert.last_sent_at, None);

        // Quiet interval is measured from creation when nothing was sent
        assert!(cache.add_or_update_at(&e, "", t0() + Duration::minutes(30)).send);
    }

    #[test]
    fn test_low_severity_cell_trace_is_sent() {
        let cache = AlertCache::new(Duration::minutes(30));
        let mut e = event("Cell Trace: attach failed", 3);
        e.is_cell_trace = true;
        assert!(cache.add_or_update_at(&e, "", t0()).send);
    }

    #[test]
    fn test_newly_cell_trace_forces_send() {
        let cache = AlertCache::new(Duration::minutes(30));
        let plain = event("handover stalled on sector 4", 3);
        assert!(!cache.add_or_update_at(&plain, "", t0()).send);

        let mut traced = plain.clone();
        traced.is_cell_trace = true;
        // The prefixed key misses, fuzzy merge finds the plain aggregate
        let decision = cache.add_or_update_at(&traced, "", t0() + Duration::seconds(1));
        assert!(decision.send);
        assert!(decision.alert.is_cell_trace);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ttl_expiry_restarts_count() {
        let cache = AlertCache::new(Duration::minutes(5));
        let e = event("ERROR disk full", 8);
        cache.add_or_update_at(&e, "", t0());
        cache.add_or_update_at(&e, "", t0() + Duration::minutes(1));

        assert_eq!(cache.cleanup_at(t0() + Duration::minutes(3)), 0);
        assert_eq!(cache.cleanup_at(t0() + Duration::minutes(7)), 1);
        assert!(cache.is_empty());

        let decision = cache.add_or_update_at(&e, "", t0() + Duration::minutes(8));
        assert_eq!(decision.alert.count, 1);
        assert!(decision.send);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_fold_into_one_aggregate() {
        const PRODUCERS: u64 = 32;
        let cache = std::sync::Arc::new(AlertCache::new(Duration::minutes(30)));
        let e = event("ERROR connection reset by peer", 6);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..PRODUCERS {
            let cache = std::sync::Arc::clone(&cache);
            let e = e.clone();
            tasks.spawn(async move { cache.add_or_update(&e, "") });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        assert_eq!(cache.len(), 1);
        let alert = cache.get(&alert_key(&e)).unwrap();
        assert_eq!(alert.count, PRODUCERS);
        assert_eq!(alert.cumulative_severity, 6 * PRODUCERS);
    }

    #[test]
    fn test_merge_context_lines_caps_and_dedups() {
        let existing: Vec<String> = (0..15).map(|i| format!("line {}", i)).collect();
        let incoming: Vec<String> = (10..30).map(|i| format!("line {}", i)).collect();
        let merged = merge_context_lines(&existing, &incoming);

        assert_eq!(merged.len(), MAX_CONTEXT_LINES);
        assert_eq!(merged[0], "line 0");
        assert_eq!(merged[19], "line 19");
    }
}
