//! Push-channel message envelope shared by every [`EventSource`](super::EventSource).
//!
//! Each message is `{"type": "progress" | "heartbeat" | "error", ...}`;
//! progress envelopes carry the event fields inline.

use crate::api::ProgressEvent;

/// Decode one envelope. Heartbeats, server errors and undecodable payloads
/// yield `None`.
pub fn decode_envelope(payload: &str, document_id: &str) -> Option<ProgressEvent> {
    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(document_id = %document_id, error = %e, "Undecodable event payload");
            return None;
        }
    };

    match value.get("type").and_then(|t| t.as_str()) {
        Some("heartbeat") => None,
        Some("error") => {
            let message = value
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown");
            tracing::warn!(document_id = %document_id, server_message = %message, "Server reported event error");
            None
        }
        _ => match serde_json::from_value(value) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(document_id = %document_id, error = %e, "Malformed progress event");
                None
            }
        },
    }
}
