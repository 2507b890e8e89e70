use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while tailing log files
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to persist offset for {path}: {reason}")]
    OffsetPersist { path: PathBuf, reason: String },

    #[error("Scan timed out after {elapsed_ms}ms with {pending} file(s) unfinished")]
    Timeout { elapsed_ms: u128, pending: usize },

    #[error("Scan worker failed: {0}")]
    Worker(String),
}

/// Errors that can occur during AI analysis
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Backend communication failed: {0}")]
    BackendError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur when sending alerts
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Failed to send notification: {0}")]
    NotificationFailed(String),

    #[error("Channel rejected notification: {message} (code {code})")]
    Rejected { code: i64, message: String },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur when writing records to the search index
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("No index node accepted the record: {0}")]
    AllNodesFailed(String),

    #[error("Index returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
