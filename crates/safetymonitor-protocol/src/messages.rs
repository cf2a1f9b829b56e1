//! Protocol message types.
//!
//! This module defines every JSON shape the device speaks:
//! - Alpaca REST envelopes (success and failure)
//! - Management API payloads (server description, configured devices)
//! - The UDP discovery reply
//!
//! Field names follow the Alpaca wire format (PascalCase).

use serde::{Deserialize, Serialize};

/// Alpaca success envelope.
///
/// # Example
/// ```json
/// {
///   "Value": true,
///   "ClientTransactionID": 12,
///   "ServerTransactionID": 57,
///   "ErrorNumber": 0,
///   "ErrorMessage": ""
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SuccessResponse<T> {
    pub value: T,
    #[serde(rename = "ClientTransactionID")]
    pub client_transaction_id: u32,
    #[serde(rename = "ServerTransactionID")]
    pub server_transaction_id: u32,
    pub error_number: i32,
    pub error_message: String,
}

/// Alpaca failure envelope. Carries no `Value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorResponse {
    #[serde(rename = "ClientTransactionID")]
    pub client_transaction_id: u32,
    #[serde(rename = "ServerTransactionID")]
    pub server_transaction_id: u32,
    pub error_number: i32,
    pub error_message: String,
}

// ============================================================================
// Management API
// ============================================================================

/// Value of `GET /management/v1/description`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerDescription {
    pub server_name: String,
    pub manufacturer: String,
    pub manufacturer_version: String,
    pub location: String,
}

/// One entry of `GET /management/v1/configureddevices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfiguredDevice {
    pub device_name: String,
    pub device_type: String,
    pub device_number: u32,
    #[serde(rename = "UniqueID")]
    pub unique_id: String,
}

// ============================================================================
// Discovery
// ============================================================================

/// UDP discovery reply.
///
/// # Example
/// ```json
/// {"AlpacaPort": 11111}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    #[serde(rename = "AlpacaPort")]
    pub alpaca_port: u16,
}
