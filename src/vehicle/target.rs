use super::VehicleClient;
use super::types::{ChargeState, ChargingState, ControlResult, VehicleFault};
use crate::config::{ControlsConfig, VehicleConfig};
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use std::time::Duration;

fn bool_label(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

/// The vehicle seen as a consumer whose charge current can be adjusted
pub struct ChargeTarget {
    client: Box<dyn VehicleClient>,
    min_current: i32,
    read_attempts: u32,
    wake_timeout: Duration,
    wake_settle: Duration,
    rate_limit_backoff: Duration,
    unknown_error_backoff: Duration,
    released: bool,
    logger: StructuredLogger,
}

impl ChargeTarget {
    pub fn new(
        client: Box<dyn VehicleClient>,
        controls: &ControlsConfig,
        vehicle: &VehicleConfig,
    ) -> Self {
        Self {
            client,
            min_current: controls.min_charge_current,
            read_attempts: controls.state_read_attempts.max(1),
            wake_timeout: Duration::from_secs(vehicle.communication_timeout_secs),
            wake_settle: Duration::from_secs(controls.wake_settle_secs),
            rate_limit_backoff: Duration::from_secs(controls.rate_limit_backoff_secs),
            unknown_error_backoff: Duration::from_secs(controls.unknown_error_backoff_secs),
            released: false,
            logger: get_logger("vehicle"),
        }
    }

    /// Fetch a fresh charge state, retrying transient failures.
    ///
    /// An asleep vehicle is woken before the next attempt, a rate-limited
    /// one is left alone for a while. Once all attempts are used up the last
    /// error is returned.
    pub async fn read_state(&mut self) -> Result<ChargeState> {
        let mut attempt = 1;
        loop {
            let err = match self.client.charge_state().await {
                Ok(mut state) => {
                    if state.normalize() {
                        self.logger.warn(&format!(
                            "Vehicle reported inconsistent currents, capped actual at {} A",
                            state.charger_actual_current
                        ));
                    }
                    self.logger.debug(&format!("charge_state: {:?}", state));
                    return Ok(state);
                }
                Err(err) => err,
            };

            let fault = VehicleFault::classify(&err);
            if attempt >= self.read_attempts {
                self.logger.error(&format!(
                    "Reading vehicle state failed after {} attempt(s) ({:?}): {}",
                    attempt, fault, err
                ));
                return Err(err);
            }

            let backoff = match fault {
                VehicleFault::Asleep => {
                    self.logger
                        .info(&format!("Vehicle asleep (attempt {}), waking up", attempt));
                    if let Err(wake_err) = self.client.wake_up(self.wake_timeout).await {
                        self.logger.warn(&format!("Wake-up failed: {}", wake_err));
                    }
                    self.wake_settle
                }
                VehicleFault::RateLimited => {
                    self.logger.warn(&format!(
                        "Vehicle API rate limited (attempt {}), backing off {}s",
                        attempt,
                        self.rate_limit_backoff.as_secs()
                    ));
                    self.rate_limit_backoff
                }
                VehicleFault::Other => {
                    self.logger.error(&format!(
                        "Unexpected vehicle API failure (attempt {}), backing off {}s: {}",
                        attempt,
                        self.unknown_error_backoff.as_secs(),
                        err
                    ));
                    self.unknown_error_backoff
                }
            };
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    /// First reason the vehicle cannot charge, if any
    pub fn readiness_check(state: &ChargeState) -> Option<String> {
        let heat_blocked = state.not_enough_power_to_heat == Some(true);
        let latched = state.charge_port_latch.as_deref() == Some("Engaged");
        let door_open = state.charge_port_door_open;

        if heat_blocked {
            Some(format!("not_enough_power_to_heat : {}", bool_label(true)))
        } else if !latched {
            Some(format!(
                "charge_port_latch : {}",
                state.charge_port_latch.as_deref().unwrap_or("None")
            ))
        } else if !door_open {
            Some(format!("charge_port_door_open : {}", bool_label(false)))
        } else {
            None
        }
    }

    /// Current to request for a change of `delta` amps.
    ///
    /// Always within `[0, charge_current_request_max]`; anything below the
    /// minimum effective current becomes 0.
    pub fn compute_requested_current(&self, delta: i32, state: &ChargeState) -> i32 {
        let max = state.charge_current_request_max.max(0);
        let unclamped = state.charger_actual_current.saturating_add(delta);
        if unclamped > max {
            self.logger.error(&format!(
                "Requested {} A exceeds vehicle maximum {} A, clamping",
                unclamped, max
            ));
        }

        let requested = unclamped.clamp(0, max);
        if requested < self.min_current {
            0
        } else {
            requested
        }
    }

    /// Move the charge current by `delta` amps, starting or stopping the
    /// charge as needed. Command failures are returned as-is.
    pub async fn apply_rate(&mut self, delta: i32) -> Result<ControlResult> {
        let state = self.read_state().await?;
        self.logger.info(&state.summary());

        if let Some(reason) = Self::readiness_check(&state) {
            self.logger
                .warn(&format!("Vehicle not ready to charge: {}", reason));
            return Ok(ControlResult::NotChargeable(reason));
        }

        if state.charging_state == ChargingState::Charged {
            return Ok(ControlResult::Charged);
        }

        let previous = state.charger_actual_current;
        let requested = self.compute_requested_current(delta, &state);
        if requested == previous {
            self.logger.info(&format!(
                "Charge rate unchanged at {} A ({})",
                previous, state.charging_state
            ));
            return Ok(ControlResult::from(state.charging_state));
        }

        self.logger.info(&format!(
            "Setting charge rate {} A -> {} A (max {} A)",
            previous, requested, state.charge_current_request_max
        ));
        self.client.wake_up(self.wake_timeout).await?;
        self.client.set_charging_amps(requested).await?;

        if requested == 0 {
            self.client.stop_charge().await?;
            Ok(ControlResult::Stopped)
        } else {
            if previous == 0 {
                self.client.start_charge().await?;
            }
            Ok(ControlResult::Charging)
        }
    }

    /// Stop charging and close the session. Best effort; runs once.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        self.logger.info("Stopping charge and releasing vehicle session");
        if let Err(e) = self.client.stop_charge().await {
            self.logger
                .warn(&format!("Failed to stop charging on release: {}", e));
        }
        if let Err(e) = self.client.close().await {
            self.logger
                .warn(&format!("Failed to close vehicle session: {}", e));
        }
    }
}
