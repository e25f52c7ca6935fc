//! Vehicle API integration for Helios
//!
//! This module wraps a remote-controllable vehicle as a charge target:
//! reading its charge state and pushing new charge currents, start and stop
//! commands.

use crate::error::Result;
use std::time::Duration;

pub mod target;
pub mod tesla;
pub mod types;

pub use target::ChargeTarget;
pub use tesla::TeslaVehicleClient;
pub use types::{ChargeState, ChargingState, ControlResult, VehicleFault};

/// Vehicle client trait
#[async_trait::async_trait]
pub trait VehicleClient: Send + Sync {
    async fn charge_state(&self) -> Result<ChargeState>;

    /// Wake the vehicle, waiting at most `timeout` for it to come online
    async fn wake_up(&self, timeout: Duration) -> Result<()>;

    async fn set_charging_amps(&self, amps: i32) -> Result<()>;

    async fn start_charge(&self) -> Result<()>;

    async fn stop_charge(&self) -> Result<()>;

    /// Release the session
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
