//! Error types and handling for Solarcharge
//!
//! This module defines the error taxonomy shared by the gateways, the vehicle
//! and solar collaborators, and the control loop. The scheduler downgrades
//! every remote-API error to cached or placeholder data; only configuration
//! errors are fatal.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for Solarcharge operations
pub type Result<T> = std::result::Result<T, ChargerError>;

/// Main error type for Solarcharge
#[derive(Debug, Error)]
pub enum ChargerError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Transient network errors (connect, timeout, reset)
    #[error("Network error: {message}")]
    Network { message: String },

    /// Remote endpoint answered 429
    #[error("Rate limited: retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// Circuit breaker is open; no request was made
    #[error("Circuit open for {endpoint}: retry after {}s", retry_after.as_secs())]
    CircuitOpen {
        endpoint: String,
        retry_after: Duration,
    },

    /// Non-success HTTP status other than 401/429
    #[error("API error: status {status} - {message}")]
    Api { status: u16, message: String },

    /// Response body could not be parsed or failed validation
    #[error("Malformed response: {message}")]
    Malformed { message: String },

    /// Access token rejected
    #[error("Authentication expired: {message}")]
    AuthExpired { message: String },

    /// Configured vehicle is not on the account
    #[error("Vehicle not found: {vin}")]
    VehicleNotFound { vin: String },

    /// Vehicle asleep, offline or otherwise unreachable
    #[error("Vehicle unavailable: {message}")]
    Unavailable { message: String },

    /// A vehicle command was not acknowledged
    #[error("Command {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// A blocking wait was cut short by the shutdown signal
    #[error("Shutdown requested")]
    Shutdown,
}

impl ChargerError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        ChargerError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        ChargerError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        ChargerError::Network {
            message: message.into(),
        }
    }

    /// Create a new rate-limit error
    pub fn rate_limited(retry_after: Duration) -> Self {
        ChargerError::RateLimited { retry_after }
    }

    /// Create a new circuit-open error
    pub fn circuit_open<S: Into<String>>(endpoint: S, retry_after: Duration) -> Self {
        ChargerError::CircuitOpen {
            endpoint: endpoint.into(),
            retry_after,
        }
    }

    /// Create a new API status error
    pub fn api<S: Into<String>>(status: u16, message: S) -> Self {
        ChargerError::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a new malformed-response error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        ChargerError::Malformed {
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth_expired<S: Into<String>>(message: S) -> Self {
        ChargerError::AuthExpired {
            message: message.into(),
        }
    }

    /// Create a new vehicle-not-found error
    pub fn vehicle_not_found<S: Into<String>>(vin: S) -> Self {
        ChargerError::VehicleNotFound { vin: vin.into() }
    }

    /// Create a new unavailable error
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        ChargerError::Unavailable {
            message: message.into(),
        }
    }

    /// Create a new command failure
    pub fn command_failed<C: Into<String>, M: Into<String>>(command: C, message: M) -> Self {
        ChargerError::CommandFailed {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        ChargerError::Io {
            message: message.into(),
        }
    }

    /// Whether the gateway retry loop may try this call again.
    ///
    /// Only rate limiting and transport failures are transient; any non-2xx
    /// answer, 5xx included, is terminal for the call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChargerError::Network { .. } | ChargerError::RateLimited { .. }
        )
    }

    /// Short machine-friendly label used in skip reasons and status lines
    pub fn kind(&self) -> &'static str {
        match self {
            ChargerError::Config { .. } => "config",
            ChargerError::Validation { .. } => "validation",
            ChargerError::Network { .. } => "network",
            ChargerError::RateLimited { .. } => "rate_limited",
            ChargerError::CircuitOpen { .. } => "circuit_open",
            ChargerError::Api { .. } => "api",
            ChargerError::Malformed { .. } => "malformed",
            ChargerError::AuthExpired { .. } => "auth_expired",
            ChargerError::VehicleNotFound { .. } => "vehicle_not_found",
            ChargerError::Unavailable { .. } => "unavailable",
            ChargerError::CommandFailed { .. } => "command_failed",
            ChargerError::Serialization { .. } => "serialization",
            ChargerError::Io { .. } => "io",
            ChargerError::Shutdown => "shutdown",
        }
    }
}

impl From<std::io::Error> for ChargerError {
    fn from(err: std::io::Error) -> Self {
        ChargerError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for ChargerError {
    fn from(err: serde_yaml::Error) -> Self {
        ChargerError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ChargerError {
    fn from(err: serde_json::Error) -> Self {
        ChargerError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for ChargerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ChargerError::malformed(err.to_string())
        } else {
            ChargerError::network(err.to_string())
        }
    }
}
