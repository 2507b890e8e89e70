use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use logsight::config::Config;
use logsight::Pipeline;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Command-line arguments for logsight
#[derive(Parser)]
#[command(
    name = "logsight",
    about = "Log anomaly tailer - detects, analyzes and alerts on errors in log files",
    long_about = "Tails application and kernel log files, cuts error spans into events, \
                  scores and deduplicates them, optionally asks an AI model for a diagnosis, \
                  indexes the results and sends aggregated alerts to chat webhooks."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Run a single scan cycle and exit
    #[arg(long)]
    once: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// A missing config file is allowed; defaults and environment variables apply.
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    } else if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    info!("Starting logsight");

    if let Err(e) = cli.validate() {
        bail!("Invalid arguments: {}", e);
    }

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    info!(
        "Watching {} file(s), AI analysis {}, indexing {}, alerts {} ({:?}), metrics port {}",
        config.collector.paths.len(),
        enabled(config.ai.enabled),
        enabled(config.indexer.enabled),
        enabled(config.alerts.enabled),
        config.alerts.channel,
        config.metrics_port
    );

    let pipeline = Pipeline::from_config(&config);
    let cancel = CancellationToken::new();

    if cli.once {
        let report = pipeline.run_cycle(&cancel).await;
        info!(
            "Single cycle finished: {} event(s), {} processed, {} duplicate(s), {} alert(s)",
            report.events, report.processed, report.duplicates, report.alerts_sent
        );
        pipeline.processor().stats().log_snapshot();
        return Ok(());
    }

    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down gracefully...");
        handler_token.cancel();
    })
    .context("Error setting interrupt handler")?;

    info!("logsight is running. Press Ctrl+C to stop.");
    pipeline.run(cancel).await;

    info!("logsight shutdown complete");
    Ok(())
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(config: Option<PathBuf>) -> Cli {
        Cli {
            config,
            verbose: false,
            once: false,
        }
    }

    #[test]
    fn test_cli_validation_with_existing_file() {
        let temp_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        std::fs::write(temp_file.path(), "[collector]\npaths = [\"/var/log/syslog\"]").unwrap();

        assert!(cli(Some(temp_file.path().to_path_buf())).validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_missing_file() {
        assert!(cli(Some(PathBuf::from("/nonexistent/config.toml")))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_cli_validation_with_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(cli(Some(dir.path().to_path_buf())).validate().is_err());
    }

    #[test]
    fn test_cli_validation_no_config() {
        assert!(cli(None).validate().is_ok());
    }

    #[test]
    fn test_cli_parses_flags() {
        let parsed = Cli::try_parse_from(["logsight", "--config", "a.toml", "--once", "-v"]).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("a.toml")));
        assert!(parsed.once);
        assert!(parsed.verbose);
    }
}
