//! Envelope builders.
//!
//! Every response the device produces goes through [`success`] or
//! [`failure`]. Both consume exactly one server transaction id from the
//! shared counter, so the nth envelope carries `ServerTransactionID == n`.

use safetymonitor_core::DeviceState;
use serde_json::Value;

use crate::error::AlpacaError;
use crate::messages::{ErrorResponse, SuccessResponse};
use crate::params::parse_client_transaction_id;

/// Source of server transaction ids.
pub trait TransactionSource {
    /// Return the next id. Must increase by exactly one per call.
    fn next_server_transaction_id(&mut self) -> u32;
}

impl TransactionSource for DeviceState {
    fn next_server_transaction_id(&mut self) -> u32 {
        DeviceState::next_server_transaction_id(self)
    }
}

/// Build a success envelope around `value`.
pub fn success<T, S>(source: &mut S, value: T, client_tx: Option<&Value>) -> SuccessResponse<T>
where
    S: TransactionSource + ?Sized,
{
    SuccessResponse {
        value,
        client_transaction_id: parse_client_transaction_id(client_tx),
        server_transaction_id: source.next_server_transaction_id(),
        error_number: 0,
        error_message: String::new(),
    }
}

/// Build a failure envelope.
pub fn failure<S>(
    source: &mut S,
    message: impl Into<String>,
    client_tx: Option<&Value>,
    error_number: i32,
) -> ErrorResponse
where
    S: TransactionSource + ?Sized,
{
    ErrorResponse {
        client_transaction_id: parse_client_transaction_id(client_tx),
        server_transaction_id: source.next_server_transaction_id(),
        error_number,
        error_message: message.into(),
    }
}

/// Build a failure envelope from a protocol error.
pub fn error_response<S>(source: &mut S, error: &AlpacaError, client_tx: Option<&Value>) -> ErrorResponse
where
    S: TransactionSource + ?Sized,
{
    failure(source, error.to_string(), client_tx, error.error_number())
}
