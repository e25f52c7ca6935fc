//! Error types and handling for Helios
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Helios operations
pub type Result<T> = std::result::Result<T, HeliosError>;

/// Main error type for Helios
#[derive(Debug, Error)]
pub enum HeliosError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Network-related errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// API integration errors (inverter cloud)
    #[error("API error: {message}")]
    Api { message: String },

    /// Authentication/authorization errors
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Power source telemetry missing or incomplete
    #[error("Data unavailable: {message}")]
    DataUnavailable { message: String },

    /// Vehicle API failures, with the HTTP status when one was received
    #[error("Vehicle error{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Vehicle {
        status: Option<u16>,
        message: String,
    },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl HeliosError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        HeliosError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        HeliosError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        HeliosError::Io {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        HeliosError::Network {
            message: message.into(),
        }
    }

    /// Create a new API error
    pub fn api<S: Into<String>>(message: S) -> Self {
        HeliosError::Api {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        HeliosError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        HeliosError::Auth {
            message: message.into(),
        }
    }

    /// Create a new data-unavailable error
    pub fn data_unavailable<S: Into<String>>(message: S) -> Self {
        HeliosError::DataUnavailable {
            message: message.into(),
        }
    }

    /// Create a new vehicle error carrying an HTTP status
    pub fn vehicle<S: Into<String>>(status: u16, message: S) -> Self {
        HeliosError::Vehicle {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Create a new vehicle error without a status (command rejected, bad payload)
    pub fn vehicle_rejected<S: Into<String>>(message: S) -> Self {
        HeliosError::Vehicle {
            status: None,
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        HeliosError::Generic {
            message: message.into(),
        }
    }

    /// HTTP status attached to a vehicle error, if any
    pub fn vehicle_status(&self) -> Option<u16> {
        match self {
            HeliosError::Vehicle { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<std::io::Error> for HeliosError {
    fn from(err: std::io::Error) -> Self {
        HeliosError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for HeliosError {
    fn from(err: serde_yaml::Error) -> Self {
        HeliosError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HeliosError {
    fn from(err: serde_json::Error) -> Self {
        HeliosError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for HeliosError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HeliosError::timeout(err.to_string())
        } else if err.is_decode() {
            HeliosError::Serialization {
                message: err.to_string(),
            }
        } else {
            HeliosError::network(err.to_string())
        }
    }
}
