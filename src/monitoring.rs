//! Pipeline counters and latency tracking
//!
//! Every stage of the pipeline bumps a counter here; the pipeline logs a snapshot
//! after each cycle so operators can follow throughput and failure rates.

use log::{info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const MAX_LATENCY_SAMPLES: usize = 100;

/// Shared counters for one pipeline
#[derive(Debug, Default)]
pub struct PipelineStats {
    events_collected: AtomicU64,
    collect_errors: AtomicU64,
    duplicates: AtomicU64,
    ai_errors: AtomicU64,
    index_errors: AtomicU64,
    alerts_sent: AtomicU64,
    alert_failures: AtomicU64,
    cell_trace_events: AtomicU64,
    analysis_latencies: Mutex<VecDeque<Duration>>,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub events_collected: u64,
    pub collect_errors: u64,
    pub duplicates: u64,
    pub ai_errors: u64,
    pub index_errors: u64,
    pub alerts_sent: u64,
    pub alert_failures: u64,
    pub cell_trace_events: u64,
    /// Average over the most recent analyses, in milliseconds
    pub avg_ai_latency_ms: f64,
    /// Resident memory in bytes, 0 when it cannot be determined
    pub memory_usage_bytes: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_events_collected(&self, count: u64) {
        self.events_collected.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_collect_errors(&self, count: u64) {
        self.collect_errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ai_error(&self) {
        self.ai_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_index_error(&self) {
        self.index_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_result(&self, success: bool) {
        if success {
            self.alerts_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.alert_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cell_trace(&self) {
        self.cell_trace_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the latency of one analysis, keeping the most recent samples only
    pub fn record_ai_latency(&self, duration: Duration) {
        let mut latencies = self
            .analysis_latencies
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        latencies.push_back(duration);
        while latencies.len() > MAX_LATENCY_SAMPLES {
            latencies.pop_front();
        }
    }

    fn avg_ai_latency_ms(&self) -> f64 {
        let latencies = self
            .analysis_latencies
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if latencies.is_empty() {
            return 0.0;
        }
        let total_ms: f64 = latencies.iter().map(|d| d.as_millis() as f64).sum();
        total_ms / latencies.len() as f64
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_collected: self.events_collected.load(Ordering::Relaxed),
            collect_errors: self.collect_errors.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            ai_errors: self.ai_errors.load(Ordering::Relaxed),
            index_errors: self.index_errors.load(Ordering::Relaxed),
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            alert_failures: self.alert_failures.load(Ordering::Relaxed),
            cell_trace_events: self.cell_trace_events.load(Ordering::Relaxed),
            avg_ai_latency_ms: self.avg_ai_latency_ms(),
            memory_usage_bytes: memory_usage(),
        }
    }

    /// Log a snapshot, warning about unhealthy values
    pub fn log_snapshot(&self) -> StatsSnapshot {
        let snapshot = self.snapshot();
        info!(
            "Pipeline stats: collected={}, collect_errors={}, duplicates={}, ai_errors={}, \
             index_errors={}, alerts_sent={}, alert_failures={}, cell_trace={}, \
             ai_latency={:.1}ms, memory={}MB",
            snapshot.events_collected,
            snapshot.collect_errors,
            snapshot.duplicates,
            snapshot.ai_errors,
            snapshot.index_errors,
            snapshot.alerts_sent,
            snapshot.alert_failures,
            snapshot.cell_trace_events,
            snapshot.avg_ai_latency_ms,
            snapshot.memory_usage_bytes / 1024 / 1024
        );

        if snapshot.avg_ai_latency_ms > 30_000.0 {
            warn!(
                "High AI analysis latency detected: {:.1}ms",
                snapshot.avg_ai_latency_ms
            );
        }
        let attempts = snapshot.alerts_sent + snapshot.alert_failures;
        if attempts > 0 && snapshot.alert_failures * 10 > attempts {
            warn!(
                "Alert delivery failing: {} of {} attempts",
                snapshot.alert_failures, attempts
            );
        }

        snapshot
    }
}

/// Current resident memory of the process
fn memory_usage() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    if let Some(kb) = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok()) {
                        return kb * 1024;
                    }
                }
            }
        }
    }

    0
}

/// Measures one analysis and records its latency when finished
pub struct AnalysisTimer {
    start_time: Instant,
    stats: Arc<PipelineStats>,
}

impl AnalysisTimer {
    pub fn start(stats: Arc<PipelineStats>) -> Self {
        Self {
            start_time: Instant::now(),
            stats,
        }
    }

    pub fn finish(self) {
        self.stats.record_ai_latency(self.start_time.elapsed());
    }
}
