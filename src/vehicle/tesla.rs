//! Tesla Owner API client
//!
//! Expects an already-issued bearer token; obtaining one is left to external
//! tooling. Vehicles are addressed by the `id` from the account's vehicle
//! list.

use super::VehicleClient;
use super::types::ChargeState;
use crate::config::VehicleConfig;
use crate::error::{HeliosError, Result};
use crate::logging::{LogContext, get_logger_with_context};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;

/// Delay between state polls while waiting for a woken vehicle
const WAKE_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    response: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

/// Entry of the account's vehicle list
#[derive(Debug, Clone, Deserialize)]
pub struct VehicleSummary {
    pub id: u64,
    #[serde(default)]
    pub vin: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl VehicleSummary {
    fn is_online(&self) -> bool {
        self.state.as_deref() == Some("online")
    }
}

#[derive(Debug, Deserialize)]
struct VehicleData {
    charge_state: Option<ChargeState>,
}

#[derive(Debug, Deserialize)]
struct CommandResult {
    result: bool,
    #[serde(default)]
    reason: String,
}

/// Tesla vehicle client
pub struct TeslaVehicleClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    vehicle: VehicleSummary,
    logger: crate::logging::StructuredLogger,
}

impl TeslaVehicleClient {
    /// Look up the configured vehicle in the account's vehicle list
    pub async fn connect(config: &VehicleConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.communication_timeout_secs.max(1)))
            .user_agent(concat!("helios/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base_url = config.api_base_url.trim_end_matches('/').to_string();

        let vehicles: Vec<VehicleSummary> = Self::request(
            &http,
            reqwest::Method::GET,
            &format!("{}/api/1/vehicles", base_url),
            &config.access_token,
            None,
        )
        .await?;

        let vehicle = vehicles
            .get(config.vehicle_index)
            .cloned()
            .ok_or_else(|| {
                HeliosError::config(format!(
                    "vehicle_index {} out of range, account has {} vehicle(s)",
                    config.vehicle_index,
                    vehicles.len()
                ))
            })?;

        let device = vehicle
            .vin
            .clone()
            .unwrap_or_else(|| vehicle.id.to_string());
        let logger = get_logger_with_context(LogContext::new("tesla").with_device(device));
        logger.info(&format!(
            "Selected vehicle {} ({})",
            vehicle.display_name.as_deref().unwrap_or("unnamed"),
            vehicle.state.as_deref().unwrap_or("unknown state")
        ));

        Ok(Self {
            http,
            base_url,
            access_token: config.access_token.clone(),
            vehicle,
            logger,
        })
    }

    pub fn vehicle(&self) -> &VehicleSummary {
        &self.vehicle
    }

    async fn request<T: DeserializeOwned>(
        http: &reqwest::Client,
        method: reqwest::Method,
        url: &str,
        token: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let mut req = http.request(method, url).bearer_auth(token.trim());
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(HeliosError::auth("Owner API rejected the access token"));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(HeliosError::vehicle(status.as_u16(), text));
        }

        let parsed: ApiResponse<T> = resp.json().await?;
        match (parsed.response, parsed.error) {
            (Some(value), _) => Ok(value),
            (None, Some(err)) => Err(HeliosError::vehicle_rejected(err)),
            (None, None) => Err(HeliosError::vehicle_rejected("empty response")),
        }
    }

    fn vehicle_url(&self, suffix: &str) -> String {
        format!("{}/api/1/vehicles/{}{}", self.base_url, self.vehicle.id, suffix)
    }

    async fn command(&self, name: &str, body: serde_json::Value) -> Result<()> {
        self.logger.debug(&format!("command {} {}", name, body));
        let result: CommandResult = Self::request(
            &self.http,
            reqwest::Method::POST,
            &self.vehicle_url(&format!("/command/{}", name)),
            &self.access_token,
            Some(body),
        )
        .await?;

        if result.result {
            return Ok(());
        }
        // Already in the requested state
        if matches!(
            (name, result.reason.as_str()),
            ("charge_start", "is_charging") | ("charge_stop", "not_charging")
        ) {
            self.logger
                .debug(&format!("{} ignored: {}", name, result.reason));
            return Ok(());
        }
        Err(HeliosError::vehicle_rejected(format!(
            "{} rejected: {}",
            name, result.reason
        )))
    }

    async fn vehicle_summary(&self) -> Result<VehicleSummary> {
        Self::request(
            &self.http,
            reqwest::Method::GET,
            &self.vehicle_url(""),
            &self.access_token,
            None,
        )
        .await
    }
}

#[async_trait::async_trait]
impl VehicleClient for TeslaVehicleClient {
    async fn charge_state(&self) -> Result<ChargeState> {
        let data: VehicleData = Self::request(
            &self.http,
            reqwest::Method::GET,
            &self.vehicle_url("/vehicle_data?endpoints=charge_state"),
            &self.access_token,
            None,
        )
        .await?;
        data.charge_state
            .ok_or_else(|| HeliosError::vehicle_rejected("vehicle_data without charge_state"))
    }

    async fn wake_up(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut summary: VehicleSummary = Self::request(
            &self.http,
            reqwest::Method::POST,
            &self.vehicle_url("/wake_up"),
            &self.access_token,
            None,
        )
        .await?;

        while !summary.is_online() {
            if Instant::now() + WAKE_POLL_INTERVAL > deadline {
                return Err(HeliosError::timeout(format!(
                    "vehicle not woken up within {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(WAKE_POLL_INTERVAL).await;
            summary = self.vehicle_summary().await?;
        }
        self.logger.debug("vehicle online");
        Ok(())
    }

    async fn set_charging_amps(&self, amps: i32) -> Result<()> {
        self.command("set_charging_amps", json!({ "charging_amps": amps }))
            .await
    }

    async fn start_charge(&self) -> Result<()> {
        self.command("charge_start", json!({})).await
    }

    async fn stop_charge(&self) -> Result<()> {
        self.command("charge_stop", json!({})).await
    }

    async fn close(&self) -> Result<()> {
        // Bearer-token access has no server-side session to release
        self.logger.debug("closing vehicle session");
        Ok(())
    }
}
