use crate::error::{HeliosError, Result};
use serde::Deserialize;

/// One telemetry reading from the installation, all in watts except `soc`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReading {
    /// Battery power, positive while discharging, negative while charging
    pub battery_power_w: f64,
    /// Grid meter power on the metered phase, negative while exporting
    pub grid_power_w: f64,
    /// Current installation load
    pub load_w: f64,
    /// Home battery state of charge in percent
    pub battery_soc: f64,
}

impl PowerReading {
    /// Power flowing into the home battery (negative while discharging)
    pub fn battery_charging_w(&self) -> f64 {
        -self.battery_power_w
    }

    /// Power exported to the grid (negative while importing)
    pub fn feed_in_w(&self) -> f64 {
        -self.grid_power_w
    }
}

/// Open API response envelope
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    pub data: Option<T>,
}

/// Entry of the account's system list
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EssUnit {
    pub sys_sn: String,
    /// Inverter rated output in kW
    #[serde(default)]
    pub poinv: Option<f64>,
    /// Battery capacity in kWh
    #[serde(default)]
    pub cobat: Option<f64>,
    #[serde(default)]
    pub minv: Option<String>,
}

impl EssUnit {
    /// Rated inverter output in watts
    pub fn rated_output_w(&self) -> Option<f64> {
        self.poinv.filter(|kw| kw.is_finite() && *kw > 0.0).map(|kw| kw * 1000.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GridDetail {
    #[serde(default)]
    pub pmeter_l1: Option<f64>,
}

/// Raw `getLastPowerData` payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LastPowerData {
    #[serde(default)]
    pub pbat: Option<f64>,
    #[serde(default)]
    pub pgrid_detail: Option<GridDetail>,
    #[serde(default)]
    pub pload: Option<f64>,
    #[serde(default)]
    pub soc: Option<f64>,
}

impl TryFrom<LastPowerData> for PowerReading {
    type Error = HeliosError;

    fn try_from(raw: LastPowerData) -> Result<Self> {
        fn field(value: Option<f64>, name: &str) -> Result<f64> {
            match value {
                Some(v) if v.is_finite() => Ok(v),
                _ => Err(HeliosError::data_unavailable(format!(
                    "power data missing {}",
                    name
                ))),
            }
        }

        Ok(PowerReading {
            battery_power_w: field(raw.pbat, "pbat")?,
            grid_power_w: field(
                raw.pgrid_detail.and_then(|g| g.pmeter_l1),
                "pgridDetail.pmeterL1",
            )?,
            load_w: field(raw.pload, "pload")?,
            battery_soc: field(raw.soc, "soc")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_power_data_conversion() {
        let raw: LastPowerData = serde_json::from_str(
            r#"{"pbat": -500.0, "pgridDetail": {"pmeterL1": -2000.0, "pmeterL2": 0}, "pload": 1000.0, "soc": 81.2}"#,
        )
        .unwrap();
        let reading = PowerReading::try_from(raw).unwrap();
        assert_eq!(reading.battery_charging_w(), 500.0);
        assert_eq!(reading.feed_in_w(), 2000.0);
        assert_eq!(reading.load_w, 1000.0);
        assert!((reading.battery_soc - 81.2).abs() < 1e-9);
    }

    #[test]
    fn test_incomplete_power_data_is_unavailable() {
        let raw: LastPowerData =
            serde_json::from_str(r#"{"pbat": 100.0, "pload": 300.0, "soc": 50}"#).unwrap();
        let err = PowerReading::try_from(raw).unwrap_err();
        assert!(matches!(err, HeliosError::DataUnavailable { .. }));
        assert!(err.to_string().contains("pmeterL1"));
    }

    #[test]
    fn test_envelope_without_data() {
        let envelope: ApiEnvelope<LastPowerData> =
            serde_json::from_str(r#"{"code": 6053, "msg": "Too many requests"}"#).unwrap();
        assert_eq!(envelope.code, 6053);
        assert!(envelope.data.is_none());

        let envelope: ApiEnvelope<Vec<EssUnit>> =
            serde_json::from_str(r#"{"code": 200, "data": [{"sysSn": "AL1"}]}"#).unwrap();
        assert_eq!(envelope.data.map(|d| d.len()), Some(1));
        assert!(envelope.msg.is_none());
    }

    #[test]
    fn test_rated_output() {
        let unit: EssUnit =
            serde_json::from_str(r#"{"sysSn": "AL1", "poinv": 5.0, "cobat": 10.1}"#).unwrap();
        assert_eq!(unit.rated_output_w(), Some(5000.0));

        let unit: EssUnit = serde_json::from_str(r#"{"sysSn": "AL1"}"#).unwrap();
        assert_eq!(unit.rated_output_w(), None);
    }
}
