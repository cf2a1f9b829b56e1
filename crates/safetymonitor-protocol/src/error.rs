//! Alpaca protocol errors.
//!
//! Every validation failure maps to a stable Alpaca error number and an
//! HTTP status. These never escape to the transport as exceptions; the web
//! layer renders them as failure envelopes.

use thiserror::Error;

/// Alpaca error numbers used by this device.
pub mod codes {
    /// Generic/unspecified error.
    pub const UNSPECIFIED: i32 = 1024;
    /// A required parameter is missing.
    pub const MISSING_PARAMETER: i32 = 1025;
    /// A parameter value could not be interpreted.
    pub const INVALID_VALUE: i32 = 1026;
    /// Device number path segment is not a number.
    pub const INVALID_DEVICE_NUMBER: i32 = 1027;
    /// Device number path segment is negative.
    pub const NEGATIVE_DEVICE_NUMBER: i32 = 1028;
    /// No device with that number.
    pub const DEVICE_NOT_FOUND: i32 = 1029;
}

/// Protocol-level errors rendered as Alpaca failure envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlpacaError {
    /// Unspecified failure.
    #[error("{0}")]
    Unspecified(String),

    /// Required parameter absent from both query and body.
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// Parameter present but not an accepted value.
    #[error("Invalid {name} value: {value}")]
    InvalidValue { name: String, value: String },

    #[error("Invalid device number")]
    InvalidDeviceNumber,

    #[error("Negative device number")]
    NegativeDeviceNumber,

    #[error("Device not found")]
    DeviceNotFound,
}

impl AlpacaError {
    /// The Alpaca `ErrorNumber` for this error.
    pub fn error_number(&self) -> i32 {
        match self {
            AlpacaError::Unspecified(_) => codes::UNSPECIFIED,
            AlpacaError::MissingParameter(_) => codes::MISSING_PARAMETER,
            AlpacaError::InvalidValue { .. } => codes::INVALID_VALUE,
            AlpacaError::InvalidDeviceNumber => codes::INVALID_DEVICE_NUMBER,
            AlpacaError::NegativeDeviceNumber => codes::NEGATIVE_DEVICE_NUMBER,
            AlpacaError::DeviceNotFound => codes::DEVICE_NOT_FOUND,
        }
    }

    /// HTTP status to send alongside the envelope.
    ///
    /// Unknown devices are 404, malformed requests 400. Unspecified device
    /// errors travel inside a 200 envelope, as Alpaca clients expect.
    pub fn http_status(&self) -> u16 {
        match self {
            AlpacaError::DeviceNotFound => 404,
            AlpacaError::Unspecified(_) => 200,
            _ => 400,
        }
    }
}
