//! Configuration management for Helios
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. The configuration is loaded once at startup
//! and handed to the controller, vehicle and inverter constructors.

use crate::error::{HeliosError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod defaults;

/// Default configuration file locations, searched in order
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "helios_config.yaml",
    "/data/helios_config.yaml",
    "/etc/helios/config.yaml",
];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Charge target (vehicle) selection
    pub vehicle: VehicleConfig,

    /// Power source (inverter) identity and credentials
    pub inverter: InverterConfig,

    /// Control loop tuning
    pub controls: ControlsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Vehicle account and selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    /// Owner API bearer token, obtained out of band
    pub access_token: String,

    /// Index of the vehicle within the account's vehicle list
    pub vehicle_index: usize,

    /// Owner API base URL
    pub api_base_url: String,

    /// Timeout for vehicle requests and for waking the vehicle
    pub communication_timeout_secs: u64,
}

/// Inverter identity and Open API credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InverterConfig {
    /// System serial number (sysSn)
    pub serial: String,

    /// Open API application id
    pub app_id: String,

    /// Open API application secret
    pub app_secret: String,

    /// Open API base URL
    pub api_base_url: String,

    /// Minimum spacing between consecutive API requests
    pub request_spacing_ms: u64,

    /// HTTP request timeout
    pub request_timeout_secs: u64,
}

/// Control loop tuning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    /// Normal delay between power readings while actively polling
    pub poll_interval_secs: u64,

    /// Delay after an accepted rate change, so the vehicle and the inverter
    /// can both reflect the new draw
    pub settle_interval_secs: u64,

    /// Periodic check once the vehicle reports it is fully charged
    pub charged_recheck_secs: u64,

    /// Number of power samples averaged before a decision
    pub sample_count: usize,

    /// Consecutive vehicle failures before the loop gives up
    pub error_count_max: u32,

    /// Share (0..1) of battery power folded into the available power
    pub battery_charging_factor: f64,

    /// AC voltage used to convert watts into amps
    pub inverter_volts: f64,

    /// Requests below this many amps are rounded down to zero
    pub min_charge_current: i32,

    /// Attempts when reading the vehicle charge state
    pub state_read_attempts: u32,

    /// Wait after waking an asleep vehicle
    pub wake_settle_secs: u64,

    /// Wait after the vehicle API reports rate limiting
    pub rate_limit_backoff_secs: u64,

    /// Wait after an unclassified vehicle API failure
    pub unknown_error_backoff_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level; falls back to `level`
    pub console_level: Option<String>,

    /// Optional file-specific level; falls back to `level`
    pub file_level: Option<String>,

    /// Path to log file (its directory receives the rolling files)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl ControlsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_secs(self.settle_interval_secs)
    }

    pub fn charged_recheck(&self) -> Duration {
        Duration::from_secs(self.charged_recheck_secs)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from an explicit path, or from the first default
    /// location that exists
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        for path in &DEFAULT_CONFIG_PATHS {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.vehicle.access_token.trim().is_empty() {
            return Err(HeliosError::validation(
                "vehicle.access_token",
                "Access token cannot be empty",
            ));
        }

        if self.vehicle.communication_timeout_secs == 0 {
            return Err(HeliosError::validation(
                "vehicle.communication_timeout_secs",
                "Must be greater than 0",
            ));
        }

        if self.inverter.serial.trim().is_empty() {
            return Err(HeliosError::validation(
                "inverter.serial",
                "Serial cannot be empty",
            ));
        }

        if self.inverter.app_id.trim().is_empty() || self.inverter.app_secret.trim().is_empty() {
            return Err(HeliosError::validation(
                "inverter.app_id",
                "App id and secret are required",
            ));
        }

        self.controls.validate()
    }
}

impl ControlsConfig {
    /// Validate the control loop parameters
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("controls.poll_interval_secs", self.poll_interval_secs),
            ("controls.settle_interval_secs", self.settle_interval_secs),
            ("controls.charged_recheck_secs", self.charged_recheck_secs),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(HeliosError::validation(field, "Must be greater than 0"));
            }
        }

        if self.sample_count == 0 {
            return Err(HeliosError::validation(
                "controls.sample_count",
                "Must be greater than 0",
            ));
        }

        if self.error_count_max == 0 {
            return Err(HeliosError::validation(
                "controls.error_count_max",
                "Must be greater than 0",
            ));
        }

        if self.state_read_attempts == 0 {
            return Err(HeliosError::validation(
                "controls.state_read_attempts",
                "Must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&self.battery_charging_factor) {
            return Err(HeliosError::validation(
                "controls.battery_charging_factor",
                "Must be within 0.0..=1.0",
            ));
        }

        if !self.inverter_volts.is_finite() || self.inverter_volts <= 0.0 {
            return Err(HeliosError::validation(
                "controls.inverter_volts",
                "Must be positive",
            ));
        }

        if self.min_charge_current < 0 {
            return Err(HeliosError::validation(
                "controls.min_charge_current",
                "Must not be negative",
            ));
        }

        Ok(())
    }
}
