//! Charge controller
//!
//! The sampled feedback loop: reads the power source, smooths the samples,
//! converts the average surplus into an amps delta and hands it to the
//! charge target. Decisions are rate limited by the smoothing window and by
//! hysteresis on the previous result.

use crate::config::ControlsConfig;
use crate::error::{HeliosError, Result};
use crate::inverter::PowerSource;
use crate::logging::{StructuredLogger, get_logger};
use crate::vehicle::{ChargeTarget, ControlResult};
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod window;

pub use window::SmoothingWindow;

/// Why the controller stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerExit {
    /// The vehicle kept failing for this many consecutive decisions
    ErrorLimit { consecutive: u32 },
    /// The vehicle cannot charge until someone intervenes
    NotChargeable(String),
    /// The vehicle reported a charging state with no control rule
    UnknownState(String),
    /// Shutdown was requested
    Shutdown,
}

impl std::fmt::Display for ControllerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ErrorLimit { consecutive } => {
                write!(f, "{} consecutive vehicle errors", consecutive)
            }
            Self::NotChargeable(reason) => write!(f, "vehicle not chargeable: {}", reason),
            Self::UnknownState(tag) => write!(f, "unknown charging state: {}", tag),
            Self::Shutdown => f.write_str("shutdown requested"),
        }
    }
}

/// Convert an average power surplus into a whole-amp change
pub fn amps_delta(mean_watts: f64, volts: f64) -> i32 {
    (mean_watts / volts).floor() as i32
}

/// Whether a decision with `delta` should be sent given the previous result
pub fn should_act(last_result: Option<&ControlResult>, delta: i32) -> bool {
    match last_result {
        None => true,
        Some(ControlResult::Charging) => delta != 0,
        Some(ControlResult::Stopped) => delta > 0,
        Some(_) => false,
    }
}

/// Surplus charging controller
pub struct ChargeController {
    source: Box<dyn PowerSource>,
    target: ChargeTarget,
    controls: ControlsConfig,
    window: SmoothingWindow,
    error_count: u32,
    last_result: Option<ControlResult>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    shutdown_rx: Option<mpsc::UnboundedReceiver<()>>,
    logger: StructuredLogger,
}

impl ChargeController {
    pub fn new(source: Box<dyn PowerSource>, target: ChargeTarget, controls: &ControlsConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        Self {
            source,
            target,
            controls: controls.clone(),
            window: SmoothingWindow::new(controls.sample_count),
            error_count: 0,
            last_result: None,
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
            logger: get_logger("controller"),
        }
    }

    /// Sender that stops a running controller
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<()> {
        self.shutdown_tx.clone()
    }

    pub fn window(&self) -> &SmoothingWindow {
        &self.window
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn last_result(&self) -> Option<&ControlResult> {
        self.last_result.as_ref()
    }

    /// Run until the error limit, a result needing operator action, or a
    /// shutdown request. The vehicle is always released before returning.
    pub async fn run(&mut self) -> Result<ControllerExit> {
        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .ok_or_else(|| HeliosError::generic("Controller has already been run"))?;

        self.logger.info("Charge loop starting");
        let exit = loop {
            let flow = tokio::select! {
                flow = self.step() => flow,
                _ = shutdown_rx.recv() => break ControllerExit::Shutdown,
            };
            match flow {
                ControlFlow::Break(exit) => break exit,
                ControlFlow::Continue(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_rx.recv() => break ControllerExit::Shutdown,
                    }
                }
            }
        };

        self.target.release().await;
        match &exit {
            ControllerExit::Shutdown => self.logger.info("Charge loop stopped on request"),
            other => self.logger.error(&format!("Quitting: {}", other)),
        }
        Ok(exit)
    }

    /// One loop iteration. Returns the delay before the next one, or why
    /// the loop has to stop.
    pub async fn step(&mut self) -> ControlFlow<ControllerExit, Duration> {
        let sample = match self.source.available_watts().await {
            Ok(watts) => watts,
            Err(e) => {
                self.logger.warn(&format!(
                    "Power data unavailable, counting sample as 0 W: {}",
                    e
                ));
                0.0
            }
        };
        self.window.push(sample);
        self.logger.debug(&format!(
            "available_watts_recent: {:?}",
            self.window.samples().collect::<Vec<_>>()
        ));

        let mut delay = self.controls.poll_interval();
        if self.last_result.is_none() || self.window.is_full() {
            let mean = self.window.mean().unwrap_or(0.0);
            let delta = amps_delta(mean, self.source.volts());
            self.logger.info(&format!(
                "Average available power: {:.2} W, amps delta: {}",
                mean, delta
            ));

            if should_act(self.last_result.as_ref(), delta) {
                match self.target.apply_rate(delta).await {
                    Ok(result) => {
                        self.error_count = 0;
                        self.window.clear();
                        delay = self.controls.settle_interval();
                        self.logger.info(&format!("Charge state: {}", result));
                        self.last_result = Some(result);
                    }
                    Err(e) => {
                        self.error_count += 1;
                        self.logger.error(&format!(
                            "Vehicle error while changing charge rate ({}/{}): {}",
                            self.error_count, self.controls.error_count_max, e
                        ));
                        if self.error_count >= self.controls.error_count_max {
                            return ControlFlow::Break(ControllerExit::ErrorLimit {
                                consecutive: self.error_count,
                            });
                        }
                    }
                }
            }
        }

        match &self.last_result {
            Some(ControlResult::Charged) => delay = self.controls.charged_recheck(),
            Some(ControlResult::NotChargeable(reason)) => {
                return ControlFlow::Break(ControllerExit::NotChargeable(reason.clone()));
            }
            Some(ControlResult::Unknown(tag)) => {
                return ControlFlow::Break(ControllerExit::UnknownState(tag.clone()));
            }
            Some(ControlResult::Charging) | Some(ControlResult::Stopped) | None => {}
        }

        self.logger.debug(&format!(
            "result: {}, sleeping for {}s",
            self.last_result
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unset".to_string()),
            delay.as_secs()
        ));
        ControlFlow::Continue(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VehicleConfig;
    use crate::vehicle::{ChargeState, ChargingState, VehicleClient};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct ScriptedSource {
        samples: VecDeque<Result<f64>>,
        fallback: f64,
        polls: Arc<Mutex<u32>>,
    }

    impl ScriptedSource {
        fn new(samples: Vec<Result<f64>>, fallback: f64) -> (Self, Arc<Mutex<u32>>) {
            let polls = Arc::new(Mutex::new(0));
            (
                Self {
                    samples: samples.into(),
                    fallback,
                    polls: polls.clone(),
                },
                polls,
            )
        }
    }

    #[async_trait::async_trait]
    impl PowerSource for ScriptedSource {
        async fn available_watts(&mut self) -> Result<f64> {
            *self.polls.lock().unwrap() += 1;
            self.samples.pop_front().unwrap_or(Ok(self.fallback))
        }

        fn volts(&self) -> f64 {
            240.0
        }
    }

    /// Vehicle whose reported state follows the last accepted command
    #[derive(Clone)]
    struct SimulatedVehicle {
        state: Arc<Mutex<ChargeState>>,
        fail_reads: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl SimulatedVehicle {
        fn new(state: ChargeState) -> Self {
            Self {
                state: Arc::new(Mutex::new(state)),
                fail_reads: false,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing() -> Self {
            Self {
                fail_reads: true,
                ..Self::new(ChargeState::default())
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, call: &str) -> usize {
            self.calls().iter().filter(|c| c.starts_with(call)).count()
        }
    }

    #[async_trait::async_trait]
    impl VehicleClient for SimulatedVehicle {
        async fn charge_state(&self) -> Result<ChargeState> {
            self.calls.lock().unwrap().push("charge_state".to_string());
            if self.fail_reads {
                return Err(HeliosError::vehicle(500, "internal error"));
            }
            Ok(self.state.lock().unwrap().clone())
        }
        async fn wake_up(&self, _timeout: Duration) -> Result<()> {
            self.calls.lock().unwrap().push("wake_up".to_string());
            Ok(())
        }
        async fn set_charging_amps(&self, amps: i32) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("set_charging_amps({})", amps));
            self.state.lock().unwrap().charger_actual_current = amps;
            Ok(())
        }
        async fn start_charge(&self) -> Result<()> {
            self.calls.lock().unwrap().push("start_charge".to_string());
            self.state.lock().unwrap().charging_state = ChargingState::Charging;
            Ok(())
        }
        async fn stop_charge(&self) -> Result<()> {
            self.calls.lock().unwrap().push("stop_charge".to_string());
            self.state.lock().unwrap().charging_state = ChargingState::Stopped;
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            self.calls.lock().unwrap().push("close".to_string());
            Ok(())
        }
    }

    fn plugged_in(actual: i32, tag: ChargingState) -> ChargeState {
        ChargeState {
            charger_actual_current: actual,
            charge_current_request_max: 16,
            charging_state: tag,
            charge_port_latch: Some("Engaged".to_string()),
            charge_port_door_open: true,
            ..Default::default()
        }
    }

    fn controller(source: ScriptedSource, vehicle: &SimulatedVehicle) -> ChargeController {
        let controls = ControlsConfig::default();
        let target = ChargeTarget::new(Box::new(vehicle.clone()), &controls, &VehicleConfig::default());
        ChargeController::new(Box::new(source), target, &controls)
    }

    #[test]
    fn hysteresis_rules() {
        assert!(should_act(None, 0));
        assert!(should_act(Some(&ControlResult::Charging), -1));
        assert!(!should_act(Some(&ControlResult::Charging), 0));
        assert!(should_act(Some(&ControlResult::Stopped), 1));
        for delta in [-50, -1, 0] {
            assert!(!should_act(Some(&ControlResult::Stopped), delta));
        }
        assert!(!should_act(Some(&ControlResult::Charged), 10));
    }

    #[test]
    fn amps_delta_floors() {
        assert_eq!(amps_delta(2000.0, 240.0), 8);
        assert_eq!(amps_delta(-100.0, 240.0), -1);
        assert_eq!(amps_delta(239.9, 240.0), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn window_fills_before_deciding_and_clears_after() {
        let vehicle = SimulatedVehicle::new(plugged_in(10, ChargingState::Charging));
        let (source, _) = ScriptedSource::new(vec![Ok(720.0)], 480.0);
        let mut controller = controller(source, &vehicle);

        // First decision acts on a single sample
        assert_eq!(
            controller.step().await,
            ControlFlow::Continue(Duration::from_secs(90))
        );
        assert!(controller.window().is_empty());
        assert_eq!(vehicle.count("set_charging_amps(13)"), 1);

        for _ in 0..2 {
            assert_eq!(
                controller.step().await,
                ControlFlow::Continue(Duration::from_secs(60))
            );
        }
        assert_eq!(controller.window().len(), 2);
        assert_eq!(vehicle.count("charge_state"), 1);

        let _ = controller.step().await;
        assert!(controller.window().is_empty());
        assert_eq!(vehicle.count("set_charging_amps(15)"), 1);
        assert_eq!(controller.last_result(), Some(&ControlResult::Charging));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_ignores_non_positive_delta() {
        let vehicle = SimulatedVehicle::new(plugged_in(0, ChargingState::Stopped));
        let (source, _) = ScriptedSource::new(vec![], -500.0);
        let mut controller = controller(source, &vehicle);

        for _ in 0..7 {
            let _ = controller.step().await;
        }
        // Only the first decision reads the vehicle; it stays stopped
        assert_eq!(vehicle.calls(), vec!["charge_state"]);
        assert_eq!(controller.last_result(), Some(&ControlResult::Stopped));
        assert!(controller.window().len() <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_power_data_counts_as_zero() {
        let vehicle = SimulatedVehicle::new(plugged_in(8, ChargingState::Charging));
        let (source, _) = ScriptedSource::new(
            vec![Err(HeliosError::data_unavailable("offline"))],
            0.0,
        );
        let mut controller = controller(source, &vehicle);

        let _ = controller.step().await;
        assert_eq!(controller.error_count(), 0);
        // Zero delta on the first decision only reads the state
        assert_eq!(vehicle.calls(), vec!["charge_state"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_consecutive_failures() {
        let vehicle = SimulatedVehicle::failing();
        let (source, polls) = ScriptedSource::new(vec![], 1000.0);
        let mut controller = controller(source, &vehicle);

        let exit = controller.run().await.unwrap();
        assert_eq!(exit, ControllerExit::ErrorLimit { consecutive: 5 });
        assert_eq!(*polls.lock().unwrap(), 5);
        // 3 attempts per decision, then the release stop
        assert_eq!(vehicle.count("charge_state"), 15);
        assert_eq!(vehicle.count("stop_charge"), 1);
        assert_eq!(vehicle.count("close"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exits_when_not_chargeable() {
        let mut state = plugged_in(0, ChargingState::Stopped);
        state.charge_port_door_open = false;
        let vehicle = SimulatedVehicle::new(state);
        let (source, _) = ScriptedSource::new(vec![], 3000.0);
        let mut controller = controller(source, &vehicle);

        let exit = controller.run().await.unwrap();
        assert_eq!(
            exit,
            ControllerExit::NotChargeable("charge_port_door_open : False".to_string())
        );
        assert_eq!(vehicle.calls(), vec!["charge_state", "stop_charge", "close"]);
    }

    #[tokio::test(start_paused = true)]
    async fn charged_switches_to_long_recheck() {
        let vehicle = SimulatedVehicle::new(plugged_in(0, ChargingState::Charged));
        let (source, _) = ScriptedSource::new(vec![], 2500.0);
        let mut controller = controller(source, &vehicle);

        assert_eq!(
            controller.step().await,
            ControlFlow::Continue(Duration::from_secs(7200))
        );
        assert_eq!(controller.last_result(), Some(&ControlResult::Charged));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_request_releases_vehicle() {
        let vehicle = SimulatedVehicle::new(plugged_in(0, ChargingState::Stopped));
        let (source, _) = ScriptedSource::new(vec![], -200.0);
        let mut controller = controller(source, &vehicle);
        let handle = controller.shutdown_handle();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(600)).await;
            handle.send(()).ok();
        });

        assert_eq!(controller.run().await.unwrap(), ControllerExit::Shutdown);
        assert_eq!(vehicle.calls(), vec!["charge_state", "stop_charge", "close"]);
        assert!(controller.run().await.is_err());
    }
}
