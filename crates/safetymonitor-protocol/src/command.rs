//! MQTT command payload parsing.
//!
//! Payloads on `{baseTopic}/command/safe` are resolved in a fixed order:
//!
//! 1. the literal strings `true` / `false`
//! 2. a JSON document that is itself a boolean
//! 3. a JSON object with a boolean `safe` and an optional string `reason`
//!
//! Anything else is [`SafeCommand::Invalid`] and must not change state.

use serde_json::Value;

/// Reason recorded when a command does not carry one.
pub const DEFAULT_COMMAND_REASON: &str = "MQTT command";

/// Result of parsing a command payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafeCommand {
    /// `true` or `false` as plain text.
    BooleanLiteral(bool),

    /// A JSON boolean document.
    JsonBoolean(bool),

    /// `{"safe": <bool>, "reason": <string>?}`
    JsonObjectWithSafe { safe: bool, reason: String },

    /// Could not be interpreted.
    Invalid(InvalidCommand),
}

/// Why a payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidCommand {
    /// Not valid JSON (or not UTF-8).
    Malformed(String),

    /// Valid JSON of the wrong shape.
    UnsupportedShape,
}

impl std::fmt::Display for InvalidCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidCommand::Malformed(msg) => write!(f, "malformed payload: {}", msg),
            InvalidCommand::UnsupportedShape => {
                write!(f, "expected true/false or {{\"safe\": bool, \"reason\": string}}")
            }
        }
    }
}

impl SafeCommand {
    /// Parse a raw MQTT payload.
    pub fn parse(payload: &[u8]) -> Self {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text,
            Err(e) => return SafeCommand::Invalid(InvalidCommand::Malformed(e.to_string())),
        };

        match text {
            "true" => return SafeCommand::BooleanLiteral(true),
            "false" => return SafeCommand::BooleanLiteral(false),
            _ => {}
        }

        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => return SafeCommand::Invalid(InvalidCommand::Malformed(e.to_string())),
        };

        match value {
            Value::Bool(safe) => SafeCommand::JsonBoolean(safe),
            Value::Object(map) => match map.get("safe") {
                Some(Value::Bool(safe)) => {
                    let reason = map
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or(DEFAULT_COMMAND_REASON)
                        .to_string();
                    SafeCommand::JsonObjectWithSafe {
                        safe: *safe,
                        reason,
                    }
                }
                _ => SafeCommand::Invalid(InvalidCommand::UnsupportedShape),
            },
            _ => SafeCommand::Invalid(InvalidCommand::UnsupportedShape),
        }
    }

    /// The state change this command requests, as `(is_safe, reason)`.
    pub fn resolve(&self) -> Option<(bool, &str)> {
        match self {
            SafeCommand::BooleanLiteral(safe) | SafeCommand::JsonBoolean(safe) => {
                Some((*safe, DEFAULT_COMMAND_REASON))
            }
            SafeCommand::JsonObjectWithSafe { safe, reason } => Some((*safe, reason.as_str())),
            SafeCommand::Invalid(_) => None,
        }
    }
}
