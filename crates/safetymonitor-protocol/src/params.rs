//! Request parameter handling.
//!
//! Alpaca parameter names are case-insensitive and may arrive in the query
//! string or in the body (form-encoded or JSON). [`ParamSource`] holds both
//! and answers lookups with query-first precedence. The free functions here
//! interpret the few parameters the device understands.

use serde_json::{Map, Value};

use crate::error::AlpacaError;

/// Name of the client transaction id parameter.
pub const CLIENT_TRANSACTION_ID: &str = "ClientTransactionID";

/// Name of the `Connected` parameter.
pub const CONNECTED: &str = "Connected";

/// Query and body parameters of one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSource {
    query: Vec<(String, Value)>,
    body: Vec<(String, Value)>,
}

impl ParamSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use these query string pairs.
    pub fn with_query<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.into())))
            .collect();
        self
    }

    /// Use these form-encoded body pairs.
    pub fn with_form_body<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.body = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.into())))
            .collect();
        self
    }

    /// Use the members of a JSON object body.
    pub fn with_json_body(mut self, body: Map<String, Value>) -> Self {
        self.body = body.into_iter().collect();
        self
    }

    /// Look up `key` case-insensitively, query first, then body.
    ///
    /// The first match wins; `None` if the key is absent from both.
    pub fn get_ci(&self, key: &str) -> Option<&Value> {
        find_ci(&self.query, key).or_else(|| find_ci(&self.body, key))
    }

    /// The raw `ClientTransactionID` parameter, if any.
    pub fn client_transaction_raw(&self) -> Option<&Value> {
        self.get_ci(CLIENT_TRANSACTION_ID)
    }
}

fn find_ci<'a>(pairs: &'a [(String, Value)], key: &str) -> Option<&'a Value> {
    pairs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// Normalize a client transaction id.
///
/// Accepts strings and numbers. Anything missing, non-numeric, non-finite
/// or negative becomes 0; fractions are truncated; values above `u32::MAX`
/// saturate. Never fails.
pub fn parse_client_transaction_id(raw: Option<&Value>) -> u32 {
    let number = match raw {
        None | Some(Value::Null) => return 0,
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return 0;
            }
            match trimmed.parse::<f64>() {
                Ok(n) => n,
                Err(_) => return 0,
            }
        }
        Some(_) => return 0,
    };

    if !number.is_finite() {
        return 0;
    }
    let truncated = number.trunc();
    if truncated <= 0.0 {
        0
    } else if truncated >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        truncated as u32
    }
}

/// Interpret a `Connected` write.
///
/// After trimming, `true`/`1` and `false`/`0` are accepted in any case.
pub fn parse_connected_value(raw: Option<&Value>) -> Result<bool, AlpacaError> {
    let raw = raw.ok_or_else(|| AlpacaError::MissingParameter(CONNECTED.to_string()))?;
    let text = value_as_text(raw);

    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(AlpacaError::InvalidValue {
            name: CONNECTED.to_string(),
            value: text,
        }),
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Validate the `{device}` path segment.
///
/// Only device 0 exists. A non-numeric segment is 1027, a negative number
/// 1028, any other number 1029.
pub fn validate_device_number(raw: &str) -> Result<u32, AlpacaError> {
    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if let Some(magnitude) = raw.strip_prefix('-') {
        if is_digits(magnitude) {
            return if magnitude.bytes().all(|b| b == b'0') {
                Ok(0)
            } else {
                Err(AlpacaError::NegativeDeviceNumber)
            };
        }
        return Err(AlpacaError::InvalidDeviceNumber);
    }

    if !is_digits(raw) {
        return Err(AlpacaError::InvalidDeviceNumber);
    }

    match raw.parse::<u64>() {
        Ok(0) => Ok(0),
        _ => Err(AlpacaError::DeviceNotFound),
    }
}
