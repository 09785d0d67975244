//! # Wire Protocol
//!
//! Message envelope exchanged with the sync server.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Pulse Protocol Messages                            │
//! │                                                                         │
//! │  REQUEST / ACK (correlated by id)                                      │
//! │  ────────────────────────────────                                      │
//! │  CLIENT ───► Event { id, name, payload }                               │
//! │  SERVER ───► Ack   { id, response: { success, data?, error? } }        │
//! │                                                                         │
//! │  SERVER PUSH                                                           │
//! │  ───────────                                                           │
//! │  SERVER ───► Push  { event, payload }                                  │
//! │                                                                         │
//! │  KEEPALIVE                                                             │
//! │  ─────────                                                             │
//! │  CLIENT ───► Ping  { sentAt }                                          │
//! │  SERVER ───► Pong  { sentAt }          (echo, client computes RTT)     │
//! │                                                                         │
//! │  TOKEN LIFECYCLE                                                       │
//! │  ───────────────                                                       │
//! │  SERVER ───► TokenRefreshRequired                                      │
//! │  CLIENT ───► TokenUpdate { token }                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Adjacently tagged JSON:
//! ```json
//! { "type": "Event", "payload": { "id": "...", "name": "message:send", "payload": {} } }
//! ```
//!
//! Payloads stay `serde_json::Value` so servers can evolve business schemas
//! without a client release.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ErrorCode;

/// Current protocol version, sent as a connect query parameter.
pub const PROTOCOL_VERSION: u32 = 1;

/// Event name used for the periodic correlated health check.
pub const HEALTH_CHECK_EVENT: &str = "health:check";

// =============================================================================
// Envelope (Tagged Union)
// =============================================================================

/// All protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Envelope {
    /// Client request awaiting a correlated `Ack`.
    Event(EventRequest),

    /// Server acknowledgement for an `Event`.
    Ack(Ack),

    /// Unsolicited server event.
    Push(PushEvent),

    /// Keepalive probe.
    Ping(Heartbeat),

    /// Keepalive echo.
    Pong(Heartbeat),

    /// Server asks the client to refresh its credentials.
    TokenRefreshRequired,

    /// Client supplies a fresh token on the live connection.
    TokenUpdate(TokenUpdate),
}

impl Envelope {
    /// Builds a new correlated request with a fresh id.
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Envelope::Event(EventRequest {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            payload,
        })
    }

    /// Serializes to JSON text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses JSON text.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Returns the variant name (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            Envelope::Event(_) => "Event",
            Envelope::Ack(_) => "Ack",
            Envelope::Push(_) => "Push",
            Envelope::Ping(_) => "Ping",
            Envelope::Pong(_) => "Pong",
            Envelope::TokenRefreshRequired => "TokenRefreshRequired",
            Envelope::TokenUpdate(_) => "TokenUpdate",
        }
    }
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRequest {
    /// Correlation id echoed by the matching `Ack`.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub id: String,
    pub response: EventResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    /// Sender clock in epoch milliseconds.
    pub sent_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUpdate {
    pub token: String,
}

// =============================================================================
// Event Response
// =============================================================================

/// Outcome of a request.
///
/// `success == false` does not necessarily mean the request failed for good:
/// a response carrying [`ErrorCode::Queued`] means the event was captured for
/// replay.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// Error body of an [`EventResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl EventResponse {
    /// Successful response carrying `data`.
    pub fn ok(data: Value) -> Self {
        EventResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed response.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        EventResponse {
            success: false,
            data: None,
            error: Some(ResponseError {
                code: code.into(),
                message: message.into(),
                details: None,
            }),
        }
    }

    /// Pseudo-response returned when an event was captured for offline replay.
    pub fn queued(operation_id: &str) -> Self {
        let mut response = Self::failure(
            ErrorCode::Queued.as_str(),
            "Event queued for delivery when the connection is restored",
        );
        if let Some(error) = response.error.as_mut() {
            error.details = Some(serde_json::json!({ "operationId": operation_id }));
        }
        response
    }

    /// Returns true if this is a `QUEUED` pseudo-response.
    pub fn is_queued(&self) -> bool {
        !self.success
            && self
                .error
                .as_ref()
                .is_some_and(|e| e.code == ErrorCode::Queued.as_str())
    }

    /// Returns the error code, if any.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let msg = Envelope::Event(EventRequest {
            id: "req-1".into(),
            name: "message:send".into(),
            payload: json!({"text": "hello"}),
        });
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "Event");
        assert_eq!(value["payload"]["id"], "req-1");
        assert_eq!(value["payload"]["payload"]["text"], "hello");
    }

    #[test]
    fn test_unit_variant_has_no_payload() {
        let json = Envelope::TokenRefreshRequired.to_json().unwrap();
        assert_eq!(json, r#"{"type":"TokenRefreshRequired"}"#);
        let parsed = Envelope::from_json(&json).unwrap();
        assert_eq!(parsed, Envelope::TokenRefreshRequired);
    }

    #[test]
    fn test_parse_server_ack() {
        let raw = r#"{"type":"Ack","payload":{"id":"abc","response":{"success":false,"error":{"code":"FORBIDDEN","message":"nope"}}}}"#;
        match Envelope::from_json(raw).unwrap() {
            Envelope::Ack(ack) => {
                assert_eq!(ack.id, "abc");
                assert!(!ack.response.success);
                assert_eq!(ack.response.error_code(), Some("FORBIDDEN"));
            }
            other => panic!("unexpected {}", other.type_name()),
        }
    }

    #[test]
    fn test_heartbeat_camel_case() {
        let json = Envelope::Ping(Heartbeat { sent_at: 42 }).to_json().unwrap();
        assert!(json.contains("\"sentAt\":42"));
    }

    #[test]
    fn test_queued_response() {
        let response = EventResponse::queued("op-1");
        assert!(response.is_queued());
        assert_eq!(response.error_code(), Some("QUEUED"));
        assert!(!EventResponse::ok(json!(1)).is_queued());
        assert!(!EventResponse::failure("OTHER", "x").is_queued());
    }

    #[test]
    fn test_event_builder_generates_unique_ids() {
        let (a, b) = (Envelope::event("x", Value::Null), Envelope::event("x", Value::Null));
        match (a, b) {
            (Envelope::Event(a), Envelope::Event(b)) => assert_ne!(a.id, b.id),
            _ => panic!("expected events"),
        }
    }
}
