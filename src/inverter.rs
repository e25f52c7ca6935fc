//! Power source integration
//!
//! Turns inverter telemetry into a single figure: how many additional watts
//! the installation could deliver to a new consumer right now without
//! exceeding its rated output.

use crate::config::ControlsConfig;
use crate::error::Result;
use crate::logging::{LogContext, get_logger_with_context};

pub mod alphaess;
pub mod types;

pub use alphaess::AlphaEssClient;
pub use types::{EssUnit, PowerReading};

/// Source of available power samples consumed by the controller
#[async_trait::async_trait]
pub trait PowerSource: Send {
    /// Additional watts available now. May be negative, meaning the
    /// installation is already short of power.
    async fn available_watts(&mut self) -> Result<f64>;

    /// AC voltage used to convert watts into amps
    fn volts(&self) -> f64;
}

/// Raw telemetry access for an installation
#[async_trait::async_trait]
pub trait TelemetryClient: Send {
    async fn last_power(&mut self) -> Result<PowerReading>;
}

/// Additional watts available from the installation.
///
/// Export to the grid is always counted. A charging home battery is counted
/// in full; a discharging battery is folded in at `credit_factor`, so with
/// the default factor of 0 a discharge neither adds nor subtracts. The result
/// is capped at `rated_max_w - load_w` and is not clamped at zero.
pub fn compute_available_watts(reading: &PowerReading, rated_max_w: f64, credit_factor: f64) -> f64 {
    let feed_in = reading.feed_in_w();
    let battery_charging = reading.battery_charging_w();

    let raw_available = if battery_charging >= 0.0 {
        feed_in + battery_charging
    } else {
        feed_in + credit_factor * battery_charging
    };

    // Extra output must not push the inverter past its rating
    raw_available.min(rated_max_w - reading.load_w)
}

/// Inverter wrapper applying the availability rules to live telemetry
pub struct Inverter<C> {
    client: C,
    rated_max_w: f64,
    volts: f64,
    credit_factor: f64,
    logger: crate::logging::StructuredLogger,
}

impl<C: TelemetryClient> Inverter<C> {
    pub fn new(client: C, rated_max_w: f64, controls: &ControlsConfig) -> Self {
        let logger = get_logger_with_context(
            LogContext::new("inverter").with_field("rated_max_w", format!("{:.0}", rated_max_w)),
        );
        Self {
            client,
            rated_max_w,
            volts: controls.inverter_volts,
            credit_factor: controls.battery_charging_factor,
            logger,
        }
    }

    pub fn rated_max_w(&self) -> f64 {
        self.rated_max_w
    }

    fn report_home_power(&self, battery_soc: f64, available_w: f64) {
        self.logger.info(&format!(
            "Inverter: battery SoC {:.1}%, latest available power {:.1} watts",
            battery_soc, available_w
        ));
    }
}

impl Inverter<AlphaEssClient> {
    /// Query the rated output of the configured system and wrap the client
    pub async fn connect(mut client: AlphaEssClient, controls: &ControlsConfig) -> Result<Self> {
        let rated_max_w = client.rated_output_w().await?;
        let inverter = Self::new(client, rated_max_w, controls);
        inverter
            .logger
            .info(&format!("AlphaESS inverter_power_max: {:.2} W", rated_max_w));
        Ok(inverter)
    }
}

#[async_trait::async_trait]
impl<C: TelemetryClient> PowerSource for Inverter<C> {
    async fn available_watts(&mut self) -> Result<f64> {
        let reading = self.client.last_power().await?;
        self.logger.debug(&format!(
            "battery_charging: {:.2} W, feed_in: {:.2} W, load: {:.2} W",
            reading.battery_charging_w(),
            reading.feed_in_w(),
            reading.load_w
        ));

        let available = compute_available_watts(&reading, self.rated_max_w, self.credit_factor);
        self.report_home_power(reading.battery_soc, available);
        Ok(available)
    }

    fn volts(&self) -> f64 {
        self.volts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HeliosError;

    fn reading(battery_charging: f64, feed_in: f64, load: f64) -> PowerReading {
        PowerReading {
            battery_power_w: -battery_charging,
            grid_power_w: -feed_in,
            load_w: load,
            battery_soc: 50.0,
        }
    }

    #[test]
    fn discharge_credited_at_zero_factor() {
        // feed_in 2000 W, battery discharging 500 W, factor 0
        let r = reading(-500.0, 2000.0, 1000.0);
        assert_eq!(compute_available_watts(&r, 5000.0, 0.0), 2000.0);
    }

    #[test]
    fn discharge_credited_at_factor() {
        let r = reading(-500.0, 2000.0, 1000.0);
        assert_eq!(compute_available_watts(&r, 5000.0, 0.5), 1750.0);
        assert_eq!(compute_available_watts(&r, 5000.0, 1.0), 1500.0);
    }

    #[test]
    fn charging_battery_counted_in_full() {
        let r = reading(700.0, 300.0, 1000.0);
        assert_eq!(compute_available_watts(&r, 5000.0, 0.0), 1000.0);
    }

    #[test]
    fn capped_by_rating_minus_load() {
        let r = reading(3000.0, 2500.0, 1500.0);
        assert_eq!(compute_available_watts(&r, 5000.0, 0.0), 3500.0);
    }

    #[test]
    fn importing_yields_negative_availability() {
        let r = reading(0.0, -800.0, 2000.0);
        assert_eq!(compute_available_watts(&r, 5000.0, 0.0), -800.0);
    }

    #[test]
    fn never_exceeds_rating_when_added_to_load() {
        let rated = [0.0, 1500.0, 5000.0, 10000.0];
        let loads = [0.0, 250.0, 4000.0, 12000.0];
        let flows = [-3000.0, -10.0, 0.0, 900.0, 6000.0];
        for &rated_max in &rated {
            for &load in &loads {
                for &battery in &flows {
                    for &feed_in in &flows {
                        for factor in [0.0, 0.3, 1.0] {
                            let r = reading(battery, feed_in, load);
                            let avail = compute_available_watts(&r, rated_max, factor);
                            assert!(avail + load <= rated_max + 1e-9);
                        }
                    }
                }
            }
        }
    }

    struct FixedTelemetry(Option<PowerReading>);

    #[async_trait::async_trait]
    impl TelemetryClient for FixedTelemetry {
        async fn last_power(&mut self) -> Result<PowerReading> {
            self.0
                .ok_or_else(|| HeliosError::data_unavailable("endpoint unreachable"))
        }
    }

    #[tokio::test]
    async fn inverter_reports_available_watts() {
        let controls = ControlsConfig::default();
        let mut inverter = Inverter::new(
            FixedTelemetry(Some(reading(-500.0, 2000.0, 1000.0))),
            5000.0,
            &controls,
        );
        assert_eq!(inverter.available_watts().await.unwrap(), 2000.0);
        assert_eq!(inverter.volts(), 240.0);
        assert_eq!(inverter.rated_max_w(), 5000.0);
    }

    #[tokio::test]
    async fn inverter_propagates_missing_data() {
        let controls = ControlsConfig::default();
        let mut inverter = Inverter::new(FixedTelemetry(None), 5000.0, &controls);
        let err = inverter.available_watts().await.unwrap_err();
        assert!(matches!(err, HeliosError::DataUnavailable { .. }));
    }
}
