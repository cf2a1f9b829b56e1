//! # safetymonitor-protocol
//!
//! Alpaca SafetyMonitor protocol types and codecs.
//!
//! This crate defines the wire formats and the pure logic around them:
//! - REST success/failure envelopes and the shared transaction counter
//! - Case-insensitive parameter lookup and value parsing
//! - Device-number validation and Alpaca error numbers
//! - UDP discovery request/response
//! - MQTT command payload parsing

pub mod codec;
pub mod command;
pub mod discovery;
pub mod error;
pub mod messages;
pub mod metadata;
pub mod params;

pub use codec::{error_response, failure, success, TransactionSource};
pub use command::{InvalidCommand, SafeCommand, DEFAULT_COMMAND_REASON};
pub use discovery::{encode_discovery_response, is_discovery_request, DISCOVERY_REQUEST};
pub use error::AlpacaError;
pub use messages::*;
pub use params::{
    parse_client_transaction_id, parse_connected_value, validate_device_number, ParamSource,
};
