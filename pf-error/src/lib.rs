//! Error type shared by every pifan crate
//!
//! Configuration errors carry the field name and accepted range so they can
//! be shown to the user as-is.

use std::io;
use std::path::PathBuf;

/// Result type alias using PifanError
pub type Result<T> = std::result::Result<T, PifanError>;

/// Everything that can go wrong in pifan
#[derive(thiserror::Error, Debug)]
pub enum PifanError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // ============================================================================
    // Hardware Access Errors
    // ============================================================================
    #[error("Failed to read temperature from {path}: {reason}")]
    TemperatureRead {
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to write PWM {value} to pin {pin}: {reason}")]
    PwmWrite {
        pin: u8,
        value: u16,
        reason: String,
    },

    #[error("GPIO error on pin {pin}: {reason}")]
    Gpio {
        pin: u8,
        reason: String,
    },

    #[error("Hall sensor error: {0}")]
    HallSensor(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid value for '{field}={value}': min={min}, max={max}")]
    OutOfRange {
        field: String,
        value: String,
        min: i64,
        max: i64,
    },

    #[error("Invalid {section} config, should be: {rule}")]
    InvalidOrdering {
        section: &'static str,
        rule: &'static str,
    },

    // ============================================================================
    // Status Server Errors
    // ============================================================================
    #[error("Status server error: {0}")]
    Server(String),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl PifanError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a GPIO error for a pin
    pub fn gpio(pin: u8, reason: impl std::fmt::Display) -> Self {
        Self::Gpio {
            pin,
            reason: reason.to_string(),
        }
    }

    /// Create a range error for a named field
    pub fn out_of_range(field: impl Into<String>, value: impl std::fmt::Display, min: i64, max: i64) -> Self {
        Self::OutOfRange {
            field: field.into(),
            value: value.to_string(),
            min,
            max,
        }
    }

    /// Create a status server error from a string
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }
}

// Allow converting from String to PifanError
impl From<String> for PifanError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to PifanError
impl From<&str> for PifanError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
