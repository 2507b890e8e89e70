//! End-to-end processing loop
//!
//! A cycle scans the configured files once, then fans the new events out to a small
//! pool of tasks through a bounded queue. Each task masks, deduplicates, analyzes,
//! indexes and finally offers the event to the alert cache. Between cycles the
//! correlator and alert caches are swept and the counters are logged.

use crate::aggregator::Correlator;
use crate::ai::{AIAnalyzer, ChatCompletionBackend};
use crate::alerts::{
    AlertCache, AlertDispatcher, DingTalkNotifier, LogNotifier, Notifier, WeChatNotifier,
};
use crate::collectors::{FileOffsetStore, Tailer};
use crate::config::{AlertChannel, Config};
use crate::detection::RuleSet;
use crate::events::{local_hostname, LogEvent};
use crate::indexer::{ElasticsearchIndexer, IndexRecord, Indexer};
use crate::masking::mask_event;
use crate::monitoring::{AnalysisTimer, PipelineStats};
use chrono::Utc;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// What happened to one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Already seen within the correlator TTL
    Duplicate,
    /// Went through analysis, indexing and alerting
    Processed { alert_sent: bool },
}

/// Result of one scan-and-process cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub files_scanned: usize,
    pub events: usize,
    pub processed: usize,
    pub duplicates: usize,
    pub alerts_sent: usize,
    pub collect_errors: usize,
    pub timed_out: bool,
}

/// Per-event stages shared by the worker tasks
pub struct EventProcessor {
    correlator: Correlator,
    analyzer: AIAnalyzer,
    indexer: Option<Arc<dyn Indexer>>,
    dispatcher: Option<AlertDispatcher>,
    stats: Arc<PipelineStats>,
    masking: bool,
}

impl EventProcessor {
    pub fn new(correlator: Correlator, analyzer: AIAnalyzer, stats: Arc<PipelineStats>) -> Self {
        Self {
            correlator,
            analyzer,
            indexer: None,
            dispatcher: None,
            stats,
            masking: true,
        }
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn Indexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: AlertDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_masking(mut self, masking: bool) -> Self {
        self.masking = masking;
        self
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Run one event through every stage
    ///
    /// Failures of the analyzer, the indexer or the notifier are counted and logged;
    /// the event still moves on to the next stage.
    pub async fn process(&self, mut event: LogEvent) -> ProcessOutcome {
        if self.masking {
            mask_event(&mut event);
        }

        let outcome = self.correlator.observe(event);
        if !outcome.is_new {
            self.stats.record_duplicate();
            return ProcessOutcome::Duplicate;
        }
        let event = outcome.event;
        if event.is_cell_trace {
            self.stats.record_cell_trace();
        }

        let timer = AnalysisTimer::start(Arc::clone(&self.stats));
        let analysis = match self.analyzer.analyze(&event).await {
            Ok(text) => {
                timer.finish();
                text
            }
            Err(e) => {
                self.stats.record_ai_error();
                warn!("Analysis of {} failed: {}", event.event_id, e);
                String::new()
            }
        };

        if let Some(indexer) = &self.indexer {
            let record = IndexRecord::from_event(&event, &analysis, outcome.related_ids, Utc::now());
            if let Err(e) = indexer.index(&record).await {
                self.stats.record_index_error();
                warn!("Failed to index {}: {}", event.event_id, e);
            }
        }

        let mut alert_sent = false;
        if let Some(dispatcher) = &self.dispatcher {
            match dispatcher.dispatch(&event, &analysis).await {
                Ok(Some(_)) => {
                    alert_sent = true;
                    self.stats.record_alert_result(true);
                }
                Ok(None) => {}
                Err(_) => self.stats.record_alert_result(false),
            }
        }

        debug!(
            "Processed {} (severity {}, alert sent: {})",
            event.event_id, event.severity_score, alert_sent
        );
        ProcessOutcome::Processed { alert_sent }
    }

    /// Drop expired correlator and alert cache entries
    pub fn sweep(&self) {
        let signatures = self.correlator.cleanup_expired();
        let alerts = self
            .dispatcher
            .as_ref()
            .map(AlertDispatcher::cleanup)
            .unwrap_or(0);
        if signatures > 0 || alerts > 0 {
            info!(
                "Swept {} signature(s) and {} alert aggregate(s)",
                signatures, alerts
            );
        }
    }
}

/// Tails the configured files and processes what they append
pub struct Pipeline {
    paths: Vec<PathBuf>,
    tailer: Tailer,
    processor: Arc<EventProcessor>,
    scan_interval: Duration,
}

impl Pipeline {
    pub fn new(
        paths: Vec<PathBuf>,
        tailer: Tailer,
        processor: EventProcessor,
        scan_interval: Duration,
    ) -> Self {
        Self {
            paths,
            tailer,
            processor: Arc::new(processor),
            scan_interval,
        }
    }

    /// Assemble a pipeline from validated configuration
    pub fn from_config(config: &Config) -> Self {
        let rules = Arc::new(RuleSet::with_defaults());
        let store = Arc::new(FileOffsetStore::new(config.collector.offset_dir.clone()));
        let tailer = Tailer::new(config.tailer_config(), rules, local_hostname(), store);

        let analyzer = if config.ai.enabled {
            let timeout = Duration::from_secs(config.ai.timeout_secs);
            let backend = ChatCompletionBackend::new(
                config.ai.api_url.clone(),
                config.ai.api_key.clone(),
                config.ai.model.clone(),
                timeout,
            );
            AIAnalyzer::with_backend(Arc::new(backend)).with_timeout(timeout)
        } else {
            AIAnalyzer::disabled()
        };

        let correlator = Correlator::new(config.correlator_ttl(), config.correlator_window());
        let mut processor = EventProcessor::new(correlator, analyzer, Arc::new(PipelineStats::new()))
            .with_masking(config.masking);

        if config.indexer.enabled {
            processor = processor.with_indexer(Arc::new(ElasticsearchIndexer::new(
                config.indexer.nodes.clone(),
                config.indexer.index.clone(),
            )));
        }

        if config.alerts.enabled {
            let notifier: Arc<dyn Notifier> = match config.alerts.channel {
                AlertChannel::Wechat => Arc::new(WeChatNotifier::new(config.alerts.webhook.clone())),
                AlertChannel::Dingtalk => {
                    Arc::new(DingTalkNotifier::new(config.alerts.webhook.clone()))
                }
                AlertChannel::Log => Arc::new(LogNotifier),
            };
            processor = processor.with_dispatcher(AlertDispatcher::new(
                AlertCache::new(config.alert_ttl()),
                notifier,
            ));
        }

        Self::new(
            config.collector.paths.clone(),
            tailer,
            processor,
            config.scan_interval(),
        )
    }

    pub fn processor(&self) -> &Arc<EventProcessor> {
        &self.processor
    }

    /// Scan once and process every new event
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let scan = self.tailer.scan_until(&self.paths, cancel).await;
        let stats = self.processor.stats();
        stats.record_events_collected(scan.events.len() as u64);
        stats.record_collect_errors(scan.errors.len() as u64);

        let mut report = CycleReport {
            files_scanned: scan.files_scanned,
            events: scan.events.len(),
            collect_errors: scan.errors.len(),
            timed_out: scan.timed_out,
            ..CycleReport::default()
        };
        if scan.events.is_empty() {
            return report;
        }

        let config = self.tailer.config();
        let (queue_tx, queue_rx) = mpsc::channel::<LogEvent>(config.buffer_size.max(1));
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let mut workers = JoinSet::new();

        for _ in 0..config.max_workers.max(1).min(scan.events.len()) {
            let queue_rx = Arc::clone(&queue_rx);
            let processor = Arc::clone(&self.processor);
            workers.spawn(async move {
                let mut outcomes = Vec::new();
                loop {
                    let next = queue_rx.lock().await.recv().await;
                    let Some(event) = next else { break };
                    outcomes.push(processor.process(event).await);
                }
                outcomes
            });
        }

        for event in scan.events {
            if queue_tx.send(event).await.is_err() {
                warn!("Event queue closed before all events were queued");
                break;
            }
        }
        drop(queue_tx);

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        match outcome {
                            ProcessOutcome::Duplicate => report.duplicates += 1,
                            ProcessOutcome::Processed { alert_sent } => {
                                report.processed += 1;
                                if alert_sent {
                                    report.alerts_sent += 1;
                                }
                            }
                        }
                    }
                }
                Err(e) => warn!("Event worker failed: {}", e),
            }
        }

        report
    }

    /// Run cycles until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Tailing {} file(s) every {:?}",
            self.paths.len(),
            self.scan_interval
        );

        while !cancel.is_cancelled() {
            let report = self.run_cycle(&cancel).await;
            if report.events > 0 {
                info!(
                    "Cycle: {} event(s), {} processed, {} duplicate(s), {} alert(s)",
                    report.events, report.processed, report.duplicates, report.alerts_sent
                );
            }

            self.processor.sweep();
            let correlation = self.processor.correlator().statistics();
            debug!(
                "Correlator holds {} signature(s), {} relation(s)",
                correlation.cached_events, correlation.related_mappings
            );
            self.processor.stats().log_snapshot();

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.scan_interval) => {}
            }
        }

        info!("Pipeline stopped");
    }
}
