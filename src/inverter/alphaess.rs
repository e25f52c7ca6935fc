//! AlphaESS Open API client
//!
//! Every request carries `appId`, `timeStamp` and a `sign` header, where the
//! signature is the hex SHA-512 of `appId + appSecret + timeStamp`. The API
//! asks clients to leave a gap between requests, so calls are spaced by
//! `request_spacing_ms`.

use super::TelemetryClient;
use super::types::{ApiEnvelope, EssUnit, LastPowerData, PowerReading};
use crate::config::InverterConfig;
use crate::error::{HeliosError, Result};
use crate::logging::{LogContext, get_logger_with_context};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha512};
use std::time::Duration;
use tokio::time::Instant;

const API_SUCCESS: i64 = 200;

/// Compute the request signature for the given timestamp
pub fn sign(app_id: &str, app_secret: &str, timestamp: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(app_id.as_bytes());
    hasher.update(app_secret.as_bytes());
    hasher.update(timestamp.as_bytes());
    hex::encode(hasher.finalize())
}

/// Open API client bound to one system serial
pub struct AlphaEssClient {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
    app_secret: String,
    serial: String,
    request_spacing: Duration,
    last_request: Option<Instant>,
    logger: crate::logging::StructuredLogger,
}

impl AlphaEssClient {
    pub fn new(config: &InverterConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .user_agent(concat!("helios/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let logger =
            get_logger_with_context(LogContext::new("alphaess").with_device(config.serial.clone()));
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
            app_secret: config.app_secret.clone(),
            serial: config.serial.clone(),
            request_spacing: Duration::from_millis(config.request_spacing_ms),
            last_request: None,
            logger,
        })
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    async fn wait_for_spacing(&mut self) {
        if let Some(last) = self.last_request {
            let next = last + self.request_spacing;
            if next > Instant::now() {
                tokio::time::sleep_until(next).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    async fn get<T: DeserializeOwned>(&mut self, endpoint: &str, query: &[(&str, &str)]) -> Result<T> {
        self.wait_for_spacing().await;

        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = sign(&self.app_id, &self.app_secret, &timestamp);
        let url = format!("{}/{}", self.base_url, endpoint);
        self.logger.trace(&format!("GET {}", url));

        let resp = self
            .http
            .get(&url)
            .header("appId", &self.app_id)
            .header("timeStamp", &timestamp)
            .header("sign", signature)
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(HeliosError::auth(format!(
                "AlphaESS rejected credentials: {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(HeliosError::api(format!(
                "AlphaESS {} returned HTTP {}",
                endpoint, status
            )));
        }

        let envelope: ApiEnvelope<T> = resp.json().await?;
        if envelope.code != API_SUCCESS {
            return Err(HeliosError::api(format!(
                "AlphaESS {} failed with code {}: {}",
                endpoint,
                envelope.code,
                envelope.msg.unwrap_or_default()
            )));
        }
        envelope
            .data
            .ok_or_else(|| HeliosError::api(format!("AlphaESS {} returned no data", endpoint)))
    }

    /// Systems registered to the application
    pub async fn get_ess_list(&mut self) -> Result<Vec<EssUnit>> {
        self.get("getEssList", &[]).await
    }

    /// Rated output (W) of the configured system. Also verifies the
    /// credentials, since the list is the first signed call made.
    pub async fn rated_output_w(&mut self) -> Result<f64> {
        let units = self.get_ess_list().await?;
        self.logger.debug(&format!("units: {:?}", units));
        units
            .iter()
            .find(|u| u.sys_sn == self.serial)
            .and_then(EssUnit::rated_output_w)
            .ok_or_else(|| {
                HeliosError::config(format!(
                    "Failed to find AlphaESS unit with serial {}",
                    self.serial
                ))
            })
    }

    /// Latest power flows for the configured system
    pub async fn get_last_power_data(&mut self) -> Result<PowerReading> {
        let serial = self.serial.clone();
        let raw: LastPowerData = self
            .get("getLastPowerData", &[("sysSn", serial.as_str())])
            .await
            .map_err(|e| HeliosError::data_unavailable(e.to_string()))?;
        self.logger.debug(&format!("last_power: {:?}", raw));
        PowerReading::try_from(raw)
    }
}

#[async_trait::async_trait]
impl TelemetryClient for AlphaEssClient {
    async fn last_power(&mut self) -> Result<PowerReading> {
        self.get_last_power_data().await
    }
}
