use super::*;

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            vehicle_index: 0,
            api_base_url: "https://owner-api.teslamotors.com".to_string(),
            communication_timeout_secs: 240,
        }
    }
}

impl Default for InverterConfig {
    fn default() -> Self {
        Self {
            serial: String::new(),
            app_id: String::new(),
            app_secret: String::new(),
            api_base_url: "https://openapi.alphaess.com/api".to_string(),
            request_spacing_ms: 1000,
            request_timeout_secs: 30,
        }
    }
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            settle_interval_secs: 90,
            charged_recheck_secs: 2 * 3600,
            sample_count: 3,
            error_count_max: 5,
            battery_charging_factor: 0.0,
            inverter_volts: 240.0,
            min_charge_current: 1,
            state_read_attempts: 3,
            wake_settle_secs: 5,
            rate_limit_backoff_secs: 20,
            unknown_error_backoff_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/helios.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}
