/// Configuration loading, environment overrides and validation
#[allow(clippy::module_inception)]
pub mod config;

pub use config::{
    parse_duration, AiConfig, AlertChannel, AlertsConfig, CollectorConfig, Config,
    CorrelatorConfig, IndexerConfig,
};
