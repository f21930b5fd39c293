//! Parsing and encoding helpers (spec.md §4.1 "Frame codec").
//!
//! This crate stays free of any WebSocket library dependency — the relay
//! crate is the one that knows about `axum::extract::ws::Message`; it hands
//! this module raw text/bytes and gets back typed results.

use vrelay_domain::error::Error;

use crate::messages::{ClientMessage, ServerMessage, UpstreamMessage};

/// The closed set of recognized `type` discriminators for client→server
/// control messages (spec.md §6), kept in sync with `ClientMessage`'s
/// `#[serde(rename = ...)]` tags.
const KNOWN_CLIENT_TYPES: &[&str] = &[
    "session.start",
    "session.stop",
    "session.config",
    "session.interrupt",
    "session.transcript",
    "ping",
];

/// Parse a text frame from the learner into a [`ClientMessage`].
///
/// Distinguishes the two failure modes the spec calls out: a JSON parse
/// failure, or a recognized `type` whose payload doesn't match its required
/// shape, maps to `MESSAGE_PROCESSING_ERROR`; a `type` outside the closed set
/// (or missing entirely) maps to `UNKNOWN_MESSAGE_TYPE`. Neither case
/// terminates the session (spec.md §4.1, §7).
pub fn parse_client_message(text: &str) -> Result<ClientMessage, Error> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| Error::MessageProcessingError(e.to_string()))?;

    let ty = value.get("type").and_then(|v| v.as_str());

    match ty {
        Some(ty) if KNOWN_CLIENT_TYPES.contains(&ty) => {
            serde_json::from_value::<ClientMessage>(value)
                .map_err(|e| Error::MessageProcessingError(e.to_string()))
        }
        Some(ty) => Err(Error::UnknownMessageType(ty.to_string())),
        None => Err(Error::UnknownMessageType("<missing>".to_string())),
    }
}

/// Parse a text frame from the upstream provider. Per spec.md §4.6/§4.10,
/// both unparseable JSON and a recognized-but-unknown `type` are logged at
/// debug and ignored by the caller — so this returns a plain `Option`.
pub fn parse_upstream_message(text: &str) -> Option<UpstreamMessage> {
    match serde_json::from_str::<UpstreamMessage>(text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::debug!(error = %e, raw = %text, "ignoring unparseable/unknown upstream message");
            None
        }
    }
}

/// Serialize an outbound control message as a JSON text frame.
pub fn encode_server_message(msg: &ServerMessage) -> String {
    serde_json::to_string(msg).expect("ServerMessage always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_client_message() {
        let msg = parse_client_message(r#"{"type":"ping","timestamp":123}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping { timestamp: 123 }));
    }

    #[test]
    fn malformed_json_is_message_processing_error() {
        let err = parse_client_message("not json").unwrap_err();
        assert_eq!(err.code(), "MESSAGE_PROCESSING_ERROR");
    }

    #[test]
    fn unknown_type_is_unknown_message_type() {
        let err = parse_client_message(r#"{"type":"frobnicate"}"#).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_MESSAGE_TYPE");
    }

    #[test]
    fn missing_type_field_is_unknown_message_type() {
        let err = parse_client_message(r#"{"foo":"bar"}"#).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_MESSAGE_TYPE");
    }

    #[test]
    fn recognized_type_with_missing_required_field_is_message_processing_error() {
        // "session.config" is a known type, but this payload has no
        // "sessionId"/"config" — malformed shape, not an unknown type.
        let err = parse_client_message(r#"{"type":"session.config"}"#).unwrap_err();
        assert_eq!(err.code(), "MESSAGE_PROCESSING_ERROR");
    }

    #[test]
    fn upstream_unparseable_returns_none() {
        assert!(parse_upstream_message("{not json").is_none());
    }

    #[test]
    fn upstream_unknown_type_returns_none() {
        assert!(parse_upstream_message(r#"{"type":"mystery"}"#).is_none());
    }

    #[test]
    fn upstream_known_type_parses() {
        let msg = parse_upstream_message(r#"{"type":"turn_end"}"#).unwrap();
        assert!(matches!(msg, UpstreamMessage::TurnEnd {}));
    }

    #[test]
    fn encode_roundtrips_through_parse() {
        let encoded = encode_server_message(&ServerMessage::Pong {
            timestamp: 1,
            server_timestamp: 2,
            latency_ms: 1,
        });
        assert!(encoded.contains("\"type\":\"pong\""));
    }
}
