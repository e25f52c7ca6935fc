use crate::error::HeliosError;
use serde::{Deserialize, Serialize};

const KM_PER_MILE: f64 = 1.60934;

/// Charging-state tag reported by the vehicle
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum ChargingState {
    Charging,
    Stopped,
    /// Reported by the vehicle as "Complete" (or "Charged")
    Charged,
    /// Any tag the controller has no rule for, e.g. "Disconnected"
    Unknown(String),
    #[default]
    Missing,
}

impl From<String> for ChargingState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Charging" => Self::Charging,
            "Stopped" => Self::Stopped,
            "Complete" | "Charged" => Self::Charged,
            "" => Self::Missing,
            _ => Self::Unknown(s),
        }
    }
}

impl From<Option<String>> for ChargingState {
    fn from(s: Option<String>) -> Self {
        s.map(Self::from).unwrap_or_default()
    }
}

impl From<ChargingState> for String {
    fn from(state: ChargingState) -> Self {
        state.to_string()
    }
}

impl std::fmt::Display for ChargingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Charging => f.write_str("Charging"),
            Self::Stopped => f.write_str("Stopped"),
            Self::Charged => f.write_str("Charged"),
            Self::Unknown(s) => f.write_str(s),
            Self::Missing => f.write_str("unknown"),
        }
    }
}

/// Snapshot of the vehicle's charge state, using the Owner API field names
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargeState {
    /// Battery state of charge (%)
    pub battery_level: f64,
    /// Target state-of-charge limit (%)
    pub charge_limit_soc: u32,
    /// Range remaining (miles)
    pub battery_range: f64,
    /// Energy added since the charge started (kWh)
    pub charge_energy_added: f64,
    /// Rated distance added since the charge started (miles)
    pub charge_miles_added_rated: f64,
    /// Present charge current (A)
    pub charger_actual_current: i32,
    /// Maximum current the vehicle will accept (A)
    pub charge_current_request_max: i32,
    pub charging_state: ChargingState,
    /// "Engaged" when the connector is latched
    pub charge_port_latch: Option<String>,
    pub charge_port_door_open: bool,
    /// Set when the battery heater cannot be powered
    pub not_enough_power_to_heat: Option<bool>,
    /// Hours until full
    pub time_to_full_charge: f64,
}

impl ChargeState {
    /// Enforce `0 <= charger_actual_current <= charge_current_request_max`.
    /// Returns true when a reported value had to be corrected.
    pub fn normalize(&mut self) -> bool {
        let mut corrected = false;
        if self.charge_current_request_max < 0 {
            self.charge_current_request_max = 0;
            corrected = true;
        }
        if self.charger_actual_current < 0 {
            self.charger_actual_current = 0;
            corrected = true;
        }
        if self.charger_actual_current > self.charge_current_request_max {
            self.charger_actual_current = self.charge_current_request_max;
            corrected = true;
        }
        corrected
    }

    pub fn range_km(&self) -> f64 {
        self.battery_range * KM_PER_MILE
    }

    pub fn added_km(&self) -> f64 {
        self.charge_miles_added_rated * KM_PER_MILE
    }

    /// One-line human-readable summary
    pub fn summary(&self) -> String {
        let mut line = format!(
            "Vehicle: battery {:.1} km, {:.1}% (limit {}%), charge added {:.1} km, {:.2} kWh",
            self.range_km(),
            self.battery_level,
            self.charge_limit_soc,
            self.added_km(),
            self.charge_energy_added
        );
        if self.time_to_full_charge != 0.0 {
            line.push_str(&format!(
                ", time to full charge {:.1} hrs",
                self.time_to_full_charge
            ));
        }
        line
    }
}

/// Outcome of a rate-change attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResult {
    Charging,
    Stopped,
    Charged,
    /// Readiness check failed; carries the first blocking reason
    NotChargeable(String),
    /// Charging-state tag with no control rule
    Unknown(String),
}

impl From<ChargingState> for ControlResult {
    fn from(state: ChargingState) -> Self {
        match state {
            ChargingState::Charging => Self::Charging,
            ChargingState::Stopped => Self::Stopped,
            ChargingState::Charged => Self::Charged,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl std::fmt::Display for ControlResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Charging => f.write_str("Charging"),
            Self::Stopped => f.write_str("Stopped"),
            Self::Charged => f.write_str("Charged"),
            Self::NotChargeable(reason) => write!(f, "not chargeable ({})", reason),
            Self::Unknown(tag) => write!(f, "unknown ({})", tag),
        }
    }
}

/// Classification of a failed vehicle request, deciding the retry backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleFault {
    /// Vehicle offline or asleep (HTTP 408)
    Asleep,
    /// Too many requests (HTTP 429)
    RateLimited,
    Other,
}

impl VehicleFault {
    pub fn classify(err: &HeliosError) -> Self {
        match err.vehicle_status() {
            Some(408) => Self::Asleep,
            Some(429) => Self::RateLimited,
            _ => Self::Other,
        }
    }
}
