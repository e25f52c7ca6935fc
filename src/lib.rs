//! # Helios - Surplus Solar EV Charging Controller
//!
//! Throttles an electric vehicle's AC charge current so that it only draws
//! power the home installation would otherwise export to the grid or divert
//! into its battery, bounded by the inverter's rated output.
//!
//! ## Features
//!
//! - **Closed-loop control**: smoothed power samples, hysteresis and a
//!   settle interval after every rate change
//! - **Fault tolerant**: retry with backoff for asleep or rate-limited
//!   vehicles, bounded consecutive-failure limit
//! - **Safe shutdown**: charging is stopped whenever the loop exits
//! - **AlphaESS Open API**: signed telemetry requests
//! - **Tesla Owner API**: charge state, charge current, start and stop
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `inverter`: Power source and available-power computation
//! - `vehicle`: Charge target, vehicle state and commands
//! - `controller`: The sampled feedback loop

pub mod config;
pub mod controller;
pub mod error;
pub mod inverter;
pub mod logging;
pub mod vehicle;

// Re-export commonly used types
pub use config::Config;
pub use controller::{ChargeController, ControllerExit};
pub use error::{HeliosError, Result};
