use crate::collectors::TailerConfig;
use crate::error::ConfigError;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
///
/// Loaded from an optional TOML file, then overridden by environment variables.
/// Every section falls back to its defaults when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub collector: CollectorConfig,
    pub correlator: CorrelatorConfig,
    pub ai: AiConfig,
    pub alerts: AlertsConfig,
    pub indexer: IndexerConfig,
    /// Port reported for metrics scraping
    pub metrics_port: String,
    /// Redact credentials and personal data before processing
    pub masking: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub paths: Vec<PathBuf>,
    pub max_workers: usize,
    pub context_lines: usize,
    pub buffer_size: usize,
    pub scan_timeout_secs: u64,
    pub scan_interval_secs: u64,
    pub offset_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    pub cache_ttl_secs: u64,
    pub window_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub enabled: bool,
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

/// Notification channel for alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    Wechat,
    Dingtalk,
    Log,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub channel: AlertChannel,
    pub webhook: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub enabled: bool,
    pub nodes: Vec<String>,
    pub index: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collector: CollectorConfig::default(),
            correlator: CorrelatorConfig::default(),
            ai: AiConfig::default(),
            alerts: AlertsConfig::default(),
            indexer: IndexerConfig::default(),
            metrics_port: "2112".to_string(),
            masking: true,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        let tailer = TailerConfig::default();
        Self {
            paths: Vec::new(),
            max_workers: tailer.max_workers,
            context_lines: tailer.context_lines,
            buffer_size: tailer.buffer_size,
            scan_timeout_secs: tailer.scan_timeout.as_secs(),
            scan_interval_secs: 5,
            offset_dir: PathBuf::from("./offsets"),
        }
    }
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30 * 60,
            window_secs: 5 * 60,
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            timeout_secs: 30,
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 5 * 60,
            channel: AlertChannel::Log,
            webhook: String::new(),
        }
    }
}

impl Config {
    /// Load the configuration, apply environment overrides and validate
    ///
    /// A missing file is not an error: defaults are used and a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the file cannot be read or parsed, or when the
    /// resulting configuration is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(path)?
            }
            Some(path) => {
                warn!(
                    "Configuration file {} not found, using defaults",
                    path.display()
                );
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides read through `lookup`
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(paths) = lookup("LOG_FILE_PATHS") {
            self.collector.paths = split_csv(&paths).into_iter().map(PathBuf::from).collect();
        }
        if let Some(value) = lookup("MAX_WORKERS") {
            match value.trim().parse::<usize>() {
                Ok(workers) if workers > 0 => self.collector.max_workers = workers,
                _ => warn!("Ignoring invalid MAX_WORKERS value: {}", value),
            }
        }

        override_bool(&mut self.ai.enabled, "AI_ENABLE", &lookup);
        override_string(&mut self.ai.api_url, "AI_API_URL", &lookup);
        override_string(&mut self.ai.api_key, "AI_API_KEY", &lookup);
        override_string(&mut self.ai.model, "AI_MODEL_NAME", &lookup);

        if let Some(webhook) = lookup("AI_WECHAT_WEBHOOK") {
            self.alerts.webhook = webhook;
            self.alerts.channel = AlertChannel::Wechat;
        }
        override_bool(&mut self.alerts.enabled, "ENABLE_ALERT", &lookup);
        if let Some(value) = lookup("ALERT_TTL") {
            match parse_duration(&value) {
                Some(ttl) => self.alerts.ttl_secs = ttl.as_secs(),
                None => warn!("Ignoring invalid ALERT_TTL value: {}", value),
            }
        }

        if let Some(nodes) = lookup("ES_NODES") {
            self.indexer.nodes = split_csv(&nodes);
        }
        override_string(&mut self.indexer.index, "ES_INDEX", &lookup);
        override_bool(&mut self.indexer.enabled, "ENABLE_ES", &lookup);

        override_string(&mut self.metrics_port, "METRICS_PORT", &lookup);

        self.indexer.nodes = self
            .indexer
            .nodes
            .iter()
            .map(|node| normalize_node(node))
            .collect();
    }

    /// Check that the configuration can drive a pipeline
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collector.paths.is_empty() {
            return Err(ConfigError::ValidationError(
                "no log file paths configured (collector.paths or LOG_FILE_PATHS)".to_string(),
            ));
        }
        for path in &self.collector.paths {
            if !path.exists() {
                warn!("Log file does not exist yet: {}", path.display());
            }
        }
        if self.collector.max_workers == 0 {
            return Err(ConfigError::ValidationError(
                "collector.max_workers must be greater than 0".to_string(),
            ));
        }
        if self.collector.buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "collector.buffer_size must be greater than 0".to_string(),
            ));
        }

        if self.ai.enabled {
            for (value, name) in [
                (&self.ai.api_url, "AI_API_URL"),
                (&self.ai.api_key, "AI_API_KEY"),
                (&self.ai.model, "AI_MODEL_NAME"),
            ] {
                if value.is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "AI analysis is enabled but {} is not set",
                        name
                    )));
                }
            }
        }

        if self.alerts.enabled
            && self.alerts.channel != AlertChannel::Log
            && !is_http_url(&self.alerts.webhook)
        {
            return Err(ConfigError::ValidationError(format!(
                "alert webhook must be an http(s) URL, got '{}'",
                self.alerts.webhook
            )));
        }

        if self.indexer.enabled && (self.indexer.nodes.is_empty() || self.indexer.index.is_empty()) {
            return Err(ConfigError::ValidationError(
                "indexing is enabled but ES_NODES or ES_INDEX is missing".to_string(),
            ));
        }

        Ok(())
    }

    /// Settings for the tailer
    pub fn tailer_config(&self) -> TailerConfig {
        TailerConfig {
            max_workers: self.collector.max_workers,
            context_lines: self.collector.context_lines,
            scan_timeout: Duration::from_secs(self.collector.scan_timeout_secs),
            buffer_size: self.collector.buffer_size,
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.collector.scan_interval_secs)
    }

    pub fn alert_ttl(&self) -> chrono::Duration {
        seconds(self.alerts.ttl_secs)
    }

    pub fn correlator_ttl(&self) -> chrono::Duration {
        seconds(self.correlator.cache_ttl_secs)
    }

    pub fn correlator_window(&self) -> chrono::Duration {
        seconds(self.correlator.window_secs)
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(i64::MAX as u64 / 1000) as i64)
}

fn override_string<F>(target: &mut String, key: &str, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key) {
        *target = value;
    }
}

fn override_bool<F>(target: &mut bool, key: &str, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key) {
        match value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => *target = true,
            "false" | "0" | "no" => *target = false,
            _ => warn!("Ignoring invalid boolean for {}: {}", key, value),
        }
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Add a scheme to bare `host:port` index nodes
fn normalize_node(node: &str) -> String {
    if is_http_url(node) {
        node.to_string()
    } else {
        format!("http://{}", node)
    }
}

/// Parse `300`, `30s`, `5m`, `1h` or compound values such as `1h30m`
///
/// A bare number is read as seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = value;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits == 0 {
            return None;
        }
        let amount: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.checked_mul(60)?),
            "h" => Duration::from_secs(amount.checked_mul(3600)?),
            _ => return None,
        };
        total = total.checked_add(unit)?;
        rest = &rest[unit_len..];
    }
    Some(total)
}
