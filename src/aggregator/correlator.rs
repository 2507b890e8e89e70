//! Signature cache for duplicate suppression and event correlation
//!
//! The [`Correlator`] remembers every distinct event signature it has seen. A repeat
//! of a known signature is reported as not-new so downstream work (analysis, indexing)
//! can be skipped. A new signature is linked to recently seen events from the same
//! file, with shared tags, or with similar wording.

use crate::aggregator::similarity::word_overlap;
use crate::detection::{normalize_content, sha256_hex};
use crate::events::{LogEvent, Timestamp};
use chrono::{Duration, Utc};
use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Minimum word overlap for two events to count as related
pub const RELATED_SIMILARITY: f64 = 0.7;

const TOP_EVENTS: usize = 10;
const PREVIEW_CHARS: usize = 100;

/// A signature remembered by the correlator
#[derive(Debug, Clone)]
pub struct CachedSignature {
    pub event: LogEvent,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub count: u64,
}

/// Result of observing one event
#[derive(Debug, Clone)]
pub struct CorrelationOutcome {
    /// False when the signature was already cached
    pub is_new: bool,
    /// Identifiers of related events
    pub related_ids: Vec<String>,
    /// The event, with a `Related Events:` context line when it has relations
    pub event: LogEvent,
}

/// Frequently repeated event summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrequentEvent {
    pub event_id: String,
    pub count: u64,
    pub content: String,
}

/// Snapshot of the correlator cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrelatorStats {
    pub cached_events: usize,
    pub related_mappings: usize,
    pub severity_distribution: BTreeMap<u8, usize>,
    pub top_events: Vec<FrequentEvent>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, CachedSignature>,
    /// Related event ids, keyed by signature
    related: HashMap<String, Vec<String>>,
}

/// Deduplicates and correlates events by signature
pub struct Correlator {
    state: Mutex<State>,
    cache_ttl: Duration,
    window: Duration,
}

impl Correlator {
    /// Create a correlator
    ///
    /// # Arguments
    ///
    /// * `cache_ttl` - Idle time after which a signature is forgotten
    /// * `window` - How recently a cached event must have been seen to be related
    pub fn new(cache_ttl: Duration, window: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            cache_ttl,
            window,
        }
    }

    /// Observe an event now
    pub fn observe(&self, event: LogEvent) -> CorrelationOutcome {
        self.observe_at(event, Utc::now())
    }

    /// Observe an event at a specific time (useful for testing)
    pub fn observe_at(&self, event: LogEvent, now: Timestamp) -> CorrelationOutcome {
        let signature = signature(&event);
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *guard;

        if let Some(entry) = state.entries.get_mut(&signature) {
            entry.last_seen = now;
            entry.count += 1;
            debug!(
                "Duplicate event {} (seen {} times)",
                event.event_id, entry.count
            );
            let related_ids = state.related.get(&signature).cloned().unwrap_or_default();
            return CorrelationOutcome {
                is_new: false,
                related_ids,
                event,
            };
        }

        let window_start = now - self.window;
        let mut related_ids: Vec<String> = state
            .entries
            .values()
            .filter(|cached| cached.event.event_id != event.event_id)
            .filter(|cached| cached.last_seen >= window_start)
            .filter(|cached| are_related(&event, &cached.event))
            .map(|cached| cached.event.event_id.clone())
            .collect();
        related_ids.sort();
        related_ids.dedup();

        state.related.insert(signature.clone(), related_ids.clone());
        state.entries.insert(
            signature,
            CachedSignature {
                event: event.clone(),
                first_seen: now,
                last_seen: now,
                count: 1,
            },
        );

        let mut event = event;
        if !related_ids.is_empty() {
            event
                .context_lines
                .push(format!("Related Events: {}", related_ids.join(", ")));
        }

        CorrelationOutcome {
            is_new: true,
            related_ids,
            event,
        }
    }

    /// Drop signatures idle longer than the cache TTL
    ///
    /// # Returns
    ///
    /// Number of signatures removed
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now())
    }

    pub fn cleanup_expired_at(&self, now: Timestamp) -> usize {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *guard;

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, cached)| now - cached.last_seen > self.cache_ttl)
            .map(|(signature, _)| signature.clone())
            .collect();

        for signature in &expired {
            state.entries.remove(signature);
            state.related.remove(signature);
        }

        if !expired.is_empty() {
            debug!("Expired {} cached signature(s)", expired.len());
        }
        expired.len()
    }

    /// Summarize the cache contents
    pub fn statistics(&self) -> CorrelatorStats {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut severity_distribution = BTreeMap::new();
        for cached in guard.entries.values() {
            *severity_distribution
                .entry(cached.event.severity_score)
                .or_insert(0) += 1;
        }

        let mut by_count: Vec<&CachedSignature> = guard.entries.values().collect();
        by_count.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.event.event_id.cmp(&b.event.event_id))
        });

        let top_events = by_count
            .into_iter()
            .take(TOP_EVENTS)
            .map(|cached| FrequentEvent {
                event_id: cached.event.event_id.clone(),
                count: cached.count,
                content: cached.event.raw_text.chars().take(PREVIEW_CHARS).collect(),
            })
            .collect();

        CorrelatorStats {
            cached_events: guard.entries.len(),
            related_mappings: guard.related.len(),
            severity_distribution,
            top_events,
        }
    }
}

/// Stable signature of an event's identity-relevant fields
pub fn signature(event: &LogEvent) -> String {
    let mut tags: Vec<&str> = event.tags.iter().map(String::as_str).collect();
    tags.sort_unstable();
    sha256_hex(&format!(
        "{}|{}|{}|{}",
        event.file_path,
        normalize_content(&event.raw_text),
        event.severity_score,
        tags.join(",")
    ))
}

fn are_related(a: &LogEvent, b: &LogEvent) -> bool {
    a.file_path == b.file_path
        || a.tags.iter().any(|tag| b.tags.contains(tag))
        || word_overlap(&a.raw_text, &b.raw_text) > RELATED_SIMILARITY
}
