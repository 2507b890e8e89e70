/// Error types for the log anomaly pipeline
pub mod error;

/// Core event types
pub mod events;

/// Keyword tables, severity scoring and event identity
pub mod detection;

/// File tailing, cursor persistence and segmentation
pub mod collectors;

/// Deduplication and correlation of events
pub mod aggregator;

/// AI analyzer and backend implementations
pub mod ai;

/// Alert aggregation and notifications
pub mod alerts;

/// Search index records and writers
pub mod indexer;

/// Redaction of sensitive log content
pub mod masking;

/// Pipeline counters
pub mod monitoring;

/// Scan-and-process loop
pub mod pipeline;

/// Configuration management
pub mod config;

// Re-export commonly used types
pub use error::{AlertError, AnalysisError, CollectorError, ConfigError, IndexError};
pub use events::LogEvent;
pub use pipeline::{CycleReport, EventProcessor, Pipeline};
