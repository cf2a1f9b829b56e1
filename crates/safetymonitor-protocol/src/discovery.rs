//! Alpaca UDP discovery packets.
//!
//! A client broadcasts the ASCII string `alpacadiscovery1`; every device on
//! the network answers with `{"AlpacaPort": <http port>}`. Matching is
//! case-insensitive and ignores surrounding whitespace.

use crate::messages::DiscoveryResponse;

/// The discovery request literal, lowercase.
pub const DISCOVERY_REQUEST: &str = "alpacadiscovery1";

/// Check whether a datagram is a discovery request.
pub fn is_discovery_request(datagram: &[u8]) -> bool {
    // ASCII decoding: only the low seven bits of each byte count.
    let text: String = datagram.iter().map(|b| char::from(b & 0x7f)).collect();
    text.trim().eq_ignore_ascii_case(DISCOVERY_REQUEST)
}

/// Encode the discovery reply advertising `http_port`.
pub fn encode_discovery_response(http_port: u16) -> Vec<u8> {
    // Serializing a struct with one integer field cannot fail.
    serde_json::to_vec(&DiscoveryResponse {
        alpaca_port: http_port,
    })
    .unwrap_or_else(|_| format!("{{\"AlpacaPort\":{}}}", http_port).into_bytes())
}
