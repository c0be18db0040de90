//! Station configuration
//!
//! This module handles configuration management for the station daemon:
//! the serializable configuration tree, loading/saving in TOML or JSON,
//! and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::CachePolicy;
use crate::regulatory::RegulatoryConfig;
use crate::{Result, StaError};

/// Link usability tier, as reported by the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LinkUsability {
    /// Link quality is fine
    Good = 0,
    /// Link quality is degraded
    Poor = 1,
    /// Link is about to be lost
    Unusable = 2,
}

impl LinkUsability {
    /// Get tier name
    pub fn name(&self) -> &'static str {
        match self {
            LinkUsability::Good => "good",
            LinkUsability::Poor => "poor",
            LinkUsability::Unusable => "unusable",
        }
    }
}

/// Main station configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Regulatory engine settings
    pub regulatory: RegulatoryConfig,
    /// Scan scheduler settings
    pub scan: ScanSettings,
    /// Scan-result cache policy
    pub cache: CachePolicy,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// General station settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Station name
    pub name: String,
    /// Station instance identifier
    pub station_id: String,
    /// Enable debug mode
    pub debug: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: "stascan".to_string(),
            station_id: uuid::Uuid::new_v4().to_string(),
            debug: false,
        }
    }
}

/// Per-tier scan timing profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanTimingProfile {
    /// Autonomous scan cycle interval, TU
    pub autonomous_interval_tu: u32,
    /// Result validity under this tier, seconds
    pub validity_secs: i64,
    /// Minimum active dwell per channel, TU
    pub min_active_dwell_tu: u16,
    /// Maximum active dwell per channel, TU
    pub max_active_dwell_tu: u16,
    /// Minimum passive dwell per channel, TU
    pub min_passive_dwell_tu: u16,
    /// Maximum passive dwell per channel, TU
    pub max_passive_dwell_tu: u16,
}

/// Scan timing table, one profile per usability tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanTimingTables {
    /// Profile used while the link is good
    pub good: ScanTimingProfile,
    /// Profile used while the link is poor
    pub poor: ScanTimingProfile,
    /// Profile used while the link is unusable
    pub unusable: ScanTimingProfile,
}

impl ScanTimingTables {
    /// The profile for a usability tier.
    pub fn profile_for(&self, usability: LinkUsability) -> &ScanTimingProfile {
        match usability {
            LinkUsability::Good => &self.good,
            LinkUsability::Poor => &self.poor,
            LinkUsability::Unusable => &self.unusable,
        }
    }
}

impl Default for ScanTimingTables {
    fn default() -> Self {
        Self {
            good: ScanTimingProfile {
                autonomous_interval_tu: 61440,
                validity_secs: 60,
                min_active_dwell_tu: 20,
                max_active_dwell_tu: 40,
                min_passive_dwell_tu: 100,
                max_passive_dwell_tu: 110,
            },
            poor: ScanTimingProfile {
                autonomous_interval_tu: 30720,
                validity_secs: 30,
                min_active_dwell_tu: 20,
                max_active_dwell_tu: 60,
                min_passive_dwell_tu: 100,
                max_passive_dwell_tu: 120,
            },
            unusable: ScanTimingProfile {
                autonomous_interval_tu: 10240,
                validity_secs: 15,
                min_active_dwell_tu: 30,
                max_active_dwell_tu: 80,
                min_passive_dwell_tu: 110,
                max_passive_dwell_tu: 130,
            },
        }
    }
}

/// A recently-joined network, probed first at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentNetwork {
    /// Network SSID
    pub ssid: String,
    /// Channel it was last seen on
    pub channel: u8,
}

/// Scan scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Per-tier timing tables
    pub timing: ScanTimingTables,
    /// Configured 5 GHz channels for active probing
    pub band5_channels: Vec<u8>,
    /// Configured 5 GHz channels scanned passively (DFS ranges)
    pub band5_passive_channels: Vec<u8>,
    /// Enable the roaming-specific autonomous scan
    pub roaming_scan_enabled: bool,
    /// Maximum number of fast reconnect probes at startup
    pub startup_probe_limit: usize,
    /// Recently-joined networks probed at startup
    pub recent_networks: Vec<RecentNetwork>,
    /// Candidate SSIDs probed to resolve cloaked networks
    pub cloaked_candidates: Vec<String>,
    /// Period of the channel-expiry timer, seconds
    pub expiry_check_interval_secs: u64,
    /// How long the unusable profile runs before relaxing to poor,
    /// seconds
    pub unusable_fallback_secs: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            timing: ScanTimingTables::default(),
            band5_channels: vec![36, 40, 44, 48, 149, 153, 157, 161, 165],
            band5_passive_channels: vec![
                52, 56, 60, 64, 100, 104, 108, 112, 116, 120, 124, 128, 132, 136, 140,
            ],
            roaming_scan_enabled: true,
            startup_probe_limit: 3,
            recent_networks: Vec::new(),
            cloaked_candidates: Vec::new(),
            expiry_check_interval_secs: 60,
            unusable_fallback_secs: 120,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable console logging
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
        }
    }
}

/// Configuration validation result
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether configuration is valid
    pub valid: bool,
    /// Validation errors
    pub errors: Vec<String>,
    /// Validation warnings
    pub warnings: Vec<String>,
}

/// Configuration manager
#[derive(Debug)]
pub struct ConfigManager {
    config: StationConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create a manager holding the default configuration.
    pub fn new() -> Self {
        Self {
            config: StationConfig::default(),
            config_path: None,
        }
    }

    /// Create a manager holding the given configuration.
    pub fn with_config(config: StationConfig) -> Self {
        Self {
            config,
            config_path: None,
        }
    }

    /// Load configuration from a TOML or JSON file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| StaError::Config(format!("Failed to read config file: {}", e)))?;

        let config: StationConfig = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| StaError::Config(format!("Failed to parse JSON config: {}", e)))?,
            Some("toml") => toml::from_str(&content)
                .map_err(|e| StaError::Config(format!("Failed to parse TOML config: {}", e)))?,
            _ => {
                return Err(StaError::Config(
                    "Unsupported config file format".to_string(),
                ))
            }
        };

        let manager = Self {
            config,
            config_path: Some(path.to_path_buf()),
        };
        let validation = manager.validate(&manager.config);
        if !validation.valid {
            return Err(StaError::Config(format!(
                "Configuration validation failed: {}",
                validation.errors.join(", ")
            )));
        }
        Ok(manager)
    }

    /// Save configuration to a TOML or JSON file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(&self.config)
                .map_err(|e| StaError::Config(format!("Failed to serialize config: {}", e)))?,
            Some("toml") => toml::to_string_pretty(&self.config)
                .map_err(|e| StaError::Config(format!("Failed to serialize config: {}", e)))?,
            _ => {
                return Err(StaError::Config(
                    "Unsupported config file format".to_string(),
                ))
            }
        };
        fs::write(path, content)
            .map_err(|e| StaError::Config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }

    /// Get current configuration.
    pub fn get_config(&self) -> &StationConfig {
        &self.config
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&mut self, new_config: StationConfig) -> Result<()> {
        let validation = self.validate(&new_config);
        if !validation.valid {
            return Err(StaError::Config(format!(
                "Configuration validation failed: {}",
                validation.errors.join(", ")
            )));
        }
        self.config = new_config;
        Ok(())
    }

    /// Validate a configuration.
    pub fn validate(&self, config: &StationConfig) -> ValidationResult {
        let mut result = ValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        };

        let country_len = config.regulatory.default_country.len();
        if !(2..=3).contains(&country_len) {
            result
                .errors
                .push("Default country must be 2 or 3 characters".to_string());
        }

        if config.cache.max_entries == 0 {
            result
                .errors
                .push("Cache max_entries cannot be 0".to_string());
        }
        if config.cache.roaming_validity_secs < config.cache.entry_validity_secs {
            result
                .warnings
                .push("Roaming validity is shorter than ordinary validity".to_string());
        }

        for &ch in config
            .scan
            .band5_channels
            .iter()
            .chain(&config.scan.band5_passive_channels)
        {
            if !(36..=165).contains(&ch) {
                result
                    .errors
                    .push(format!("Channel {} is not a 5 GHz channel", ch));
            }
        }
        for (tier, profile) in [
            ("good", &config.scan.timing.good),
            ("poor", &config.scan.timing.poor),
            ("unusable", &config.scan.timing.unusable),
        ] {
            if profile.min_active_dwell_tu > profile.max_active_dwell_tu
                || profile.min_passive_dwell_tu > profile.max_passive_dwell_tu
            {
                result
                    .errors
                    .push(format!("Dwell bounds inverted in {} profile", tier));
            }
            if profile.autonomous_interval_tu == 0 {
                result
                    .errors
                    .push(format!("Autonomous interval cannot be 0 in {} profile", tier));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            result.errors.push(format!(
                "Invalid log level '{}', must be one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ));
        }

        result.valid = result.errors.is_empty();
        result
    }

    /// Reload configuration from the original file.
    pub fn reload(&mut self) -> Result<()> {
        match &self.config_path {
            Some(path) => {
                let new_manager = Self::load_from_file(path)?;
                self.config = new_manager.config;
                Ok(())
            }
            None => Err(StaError::Config("No config file path set".to_string())),
        }
    }

    /// Get configuration as TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(&self.config)
            .map_err(|e| StaError::Config(format!("Failed to serialize config: {}", e)))
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
