//! Station Daemon Binary
//!
//! This is the main entry point for the station scan daemon.
//! It wires the regulatory engine, scan scheduler, and result cache onto
//! the station task, with configuration, logging, and signal handling.

use std::{path::PathBuf, process};

use clap::{Arg, Command};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stascan::cache::ScanResultCache;
use stascan::config::{ConfigManager, StationConfig};
use stascan::mlme::NullTransport;
use stascan::regulatory::RegulatoryEngine;
use stascan::scan::ScanScheduler;
use stascan::station::Station;
use stascan::{Result, StaError};

/// Default configuration file path
const DEFAULT_CONFIG_PATH: &str = "/etc/stascan/station.toml";

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("stascan-daemon")
        .version(env!("CARGO_PKG_VERSION"))
        .about("WiFi station scanning and spectrum-regulatory daemon")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .default_value(DEFAULT_LOG_LEVEL),
        )
        .arg(
            Arg::new("country")
                .long("country")
                .value_name("CODE")
                .help("Override the default country code"),
        )
        .get_matches();

    let log_level = matches.get_one::<String>("log-level").cloned();
    init_logging(log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL))?;

    info!("Starting station daemon v{}", env!("CARGO_PKG_VERSION"));

    let config_path = PathBuf::from(
        matches
            .get_one::<String>("config")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()),
    );
    let mut config = load_configuration(&config_path)?;
    if let Some(country) = matches.get_one::<String>("country") {
        config.regulatory.default_country = country.clone();
    }

    let shutdown_signal = setup_signal_handlers().await;
    let result = run_station(config, shutdown_signal).await;

    match result {
        Ok(_) => {
            info!("Station daemon shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Station daemon error: {}", e);
            process::exit(1);
        }
    }
}

/// Initialize logging system
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .map_err(|e| StaError::Config(format!("Invalid log level '{}': {}", level, e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Load station configuration from file
fn load_configuration(config_path: &PathBuf) -> Result<StationConfig> {
    if !config_path.exists() {
        warn!(
            "Configuration file not found: {}, using defaults",
            config_path.display()
        );
        return Ok(StationConfig::default());
    }

    info!("Loading configuration from: {}", config_path.display());
    let manager = ConfigManager::load_from_file(config_path)?;
    Ok(manager.get_config().clone())
}

/// Setup signal handlers for graceful shutdown
async fn setup_signal_handlers() -> tokio::sync::oneshot::Receiver<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let sigterm = signal(SignalKind::terminate());
            let sigint = signal(SignalKind::interrupt());
            match (sigterm, sigint) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                }
                _ => {
                    error!("Failed to register signal handlers");
                }
            }
        }

        #[cfg(windows)]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        let _ = tx.send(());
    });

    rx
}

/// Run the station task until a shutdown signal arrives
async fn run_station(
    config: StationConfig,
    shutdown_signal: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    info!("Initializing station components...");

    let engine = RegulatoryEngine::new(config.regulatory.clone());
    let cache = ScanResultCache::new(config.cache.clone());
    let scheduler = ScanScheduler::new(config.clone(), engine, cache);
    let transport = Arc::new(NullTransport);
    let (station, handle, mut notify_rx) = Station::new(config, scheduler, transport);

    let station_task = tokio::spawn(station.run());
    info!("Station task started");

    // Drain notifications until the shutdown signal arrives.
    tokio::pin!(shutdown_signal);
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => break,
            notification = notify_rx.recv() => match notification {
                Some(n) => info!("Station notification: {:?}", n),
                None => break,
            },
        }
    }

    info!("Shutdown signal received, stopping station...");
    handle.shutdown().await?;
    match station_task.await {
        Ok(result) => result,
        Err(e) => Err(StaError::InvalidState(format!(
            "station task panicked: {}",
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_CONFIG_PATH, "/etc/stascan/station.toml");
        assert_eq!(DEFAULT_LOG_LEVEL, "info");
    }

    #[test]
    fn test_load_nonexistent_config() {
        let path = PathBuf::from("/nonexistent/station.toml");
        let config = load_configuration(&path).unwrap();
        assert_eq!(config.general.name, "stascan");
    }
}
