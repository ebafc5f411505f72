//! Wire protocol: envelopes, the client/server message type enums, topics,
//! and the typed payload shapes listed in the external interface section.
//!
//! Decoding is deliberately two-stage: [`RawEnvelope`] captures `id`/`type`/
//! `timestamp` and leaves `payload` as an untyped [`serde_json::Value`]. Only
//! once the [`super::router::MessageRouter`] has resolved a handler for the
//! type does the handler deserialize `payload` into its own typed struct.
//! Unknown `type` strings are rejected before that second stage ever runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message type strings a client may send.
///
/// Exhaustive and closed: anything else fails to parse into this enum and is
/// routed to the fallback handler (`error: UNKNOWN_TYPE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessageType {
    Ping,
    Pong,
    Authenticate,
    Disconnect,
    Subscribe,
    Unsubscribe,
    #[serde(rename = "presence.update")]
    PresenceUpdate,
    #[serde(rename = "presence.query")]
    PresenceQuery,
    #[serde(rename = "typing.start")]
    TypingStart,
    #[serde(rename = "typing.stop")]
    TypingStop,
    #[serde(rename = "mark.read")]
    MarkRead,
    #[serde(rename = "mark.delivered")]
    MarkDelivered,
    #[serde(rename = "call.offer")]
    CallOffer,
    #[serde(rename = "call.answer")]
    CallAnswer,
    #[serde(rename = "call.ice")]
    CallIce,
    #[serde(rename = "call.hangup")]
    CallHangup,
    #[serde(rename = "message.ack")]
    MessageAck,
}

/// Message type strings the server may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessageType {
    Ping,
    Pong,
    Connected,
    #[serde(rename = "auth.success")]
    AuthSuccess,
    #[serde(rename = "auth.failed")]
    AuthFailed,
    Error,
    Disconnected,
    Subscribed,
    Unsubscribed,
    #[serde(rename = "presence.update")]
    PresenceUpdate,
    #[serde(rename = "presence.online")]
    PresenceOnline,
    #[serde(rename = "presence.offline")]
    PresenceOffline,
    #[serde(rename = "typing.start")]
    TypingStart,
    #[serde(rename = "typing.stop")]
    TypingStop,
    #[serde(rename = "message.new")]
    MessageNew,
    #[serde(rename = "message.delivered")]
    MessageDelivered,
    #[serde(rename = "message.read")]
    MessageRead,
    #[serde(rename = "message.edited")]
    MessageEdited,
    #[serde(rename = "message.deleted")]
    MessageDeleted,
    #[serde(rename = "call.incoming")]
    CallIncoming,
    #[serde(rename = "call.offer")]
    CallOffer,
    #[serde(rename = "call.answer")]
    CallAnswer,
    #[serde(rename = "call.ice")]
    CallIce,
    #[serde(rename = "call.ended")]
    CallEnded,
    Notification,
}

/// A namespace over which events are fanned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    User,
    Conversation,
    Presence,
    Typing,
    Calls,
    Notifications,
}

impl Topic {
    /// Resolve the filter key this topic reads out of a subscribe payload's
    /// `filters` map, per the table in §6.
    pub fn filter_key(self) -> &'static str {
        match self {
            Topic::User => "user_id",
            Topic::Conversation => "conversation_id",
            Topic::Presence => "global",
            Topic::Typing => "conversation_id",
            Topic::Calls => "call_id",
            Topic::Notifications => "user_id",
        }
    }

    /// Resolve the resource ID for this topic out of a filter map. Presence
    /// always resolves to `"global"`; everything else falls back to
    /// `"default"` when the relevant filter key is absent.
    pub fn resolve_resource_id(
        self,
        filters: &std::collections::HashMap<String, String>,
    ) -> String {
        if self == Topic::Presence {
            return "global".to_string();
        }
        filters
            .get(self.filter_key())
            .cloned()
            .unwrap_or_else(|| "default".to_string())
    }
}

/// Envelope fields common to both directions, decoded before the payload is
/// given a type.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub type_raw: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A fully parsed inbound message: the envelope plus a type the router
/// recognizes. `payload` is still opaque JSON until a handler claims it.
#[derive(Debug, Clone)]
pub struct ClientMessage {
    pub id: String,
    pub msg_type: ClientMessageType,
    pub payload: Value,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ClientMessage {
    /// Parse a raw envelope, mapping an unrecognized `type` string to `None`
    /// so the caller can produce an `UNKNOWN_TYPE` error.
    pub fn from_raw(raw: RawEnvelope) -> Option<Self> {
        let msg_type = match raw.type_raw.as_str() {
            "ping" => ClientMessageType::Ping,
            "pong" => ClientMessageType::Pong,
            "authenticate" => ClientMessageType::Authenticate,
            "disconnect" => ClientMessageType::Disconnect,
            "subscribe" => ClientMessageType::Subscribe,
            "unsubscribe" => ClientMessageType::Unsubscribe,
            "presence.update" => ClientMessageType::PresenceUpdate,
            "presence.query" => ClientMessageType::PresenceQuery,
            "typing.start" => ClientMessageType::TypingStart,
            "typing.stop" => ClientMessageType::TypingStop,
            "mark.read" => ClientMessageType::MarkRead,
            "mark.delivered" => ClientMessageType::MarkDelivered,
            "call.offer" => ClientMessageType::CallOffer,
            "call.answer" => ClientMessageType::CallAnswer,
            "call.ice" => ClientMessageType::CallIce,
            "call.hangup" => ClientMessageType::CallHangup,
            "message.ack" => ClientMessageType::MessageAck,
            _ => return None,
        };
        Some(Self {
            id: raw.id,
            msg_type,
            payload: raw.payload,
            timestamp: raw.timestamp,
        })
    }
}

/// A fully formed outbound message, ready to be serialized onto the wire.
#[derive(Debug, Clone, Serialize)]
pub struct ServerMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: ServerMessageType,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "request_id", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ServerMessage {
    /// Build a message that isn't a direct reply to anything (e.g. a
    /// broadcast or a heartbeat ping).
    pub fn new(msg_type: ServerMessageType, payload: impl Serialize) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            msg_type,
            payload: serde_json::to_value(payload)
                .unwrap_or(Value::Null),
            timestamp: Utc::now(),
            request_id: None,
        }
    }

    /// Build a direct response to `request`. Per the envelope invariant, the
    /// `request_id` MUST echo the originating client message's `id`.
    pub fn reply_to(
        request: &ClientMessage,
        msg_type: ServerMessageType,
        payload: impl Serialize,
    ) -> Self {
        let mut msg = Self::new(msg_type, payload);
        msg.request_id = Some(request.id.clone());
        msg
    }
}

/// Canonical error codes from §6/§7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadFrame,
    UnknownType,
    RateLimited,
    ValidationFailed,
    Unauthorized,
    NotSubscribed,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Payload of a `subscribe`/`unsubscribe` client message.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscribePayload {
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub filters: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribedPayload {
    pub topics: Vec<Topic>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_does_not_parse() {
        let raw = RawEnvelope {
            id: "1".into(),
            type_raw: "does.not.exist".into(),
            payload: Value::Object(Default::default()),
            timestamp: None,
        };
        assert!(ClientMessage::from_raw(raw).is_none());
    }

    #[test]
    fn every_client_type_string_round_trips() {
        let strings = [
            "ping",
            "pong",
            "authenticate",
            "disconnect",
            "subscribe",
            "unsubscribe",
            "presence.update",
            "presence.query",
            "typing.start",
            "typing.stop",
            "mark.read",
            "mark.delivered",
            "call.offer",
            "call.answer",
            "call.ice",
            "call.hangup",
            "message.ack",
        ];
        for s in strings {
            let raw = RawEnvelope {
                id: "x".into(),
                type_raw: s.into(),
                payload: Value::Null,
                timestamp: None,
            };
            assert!(
                ClientMessage::from_raw(raw).is_some(),
                "type `{s}` should parse"
            );
        }
    }

    #[test]
    fn reply_echoes_request_id() {
        let request = ClientMessage {
            id: "abc123".into(),
            msg_type: ClientMessageType::Ping,
            payload: Value::Null,
            timestamp: None,
        };
        let reply = ServerMessage::reply_to(
            &request,
            ServerMessageType::Pong,
            Value::Null,
        );
        assert_eq!(reply.request_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn topic_resource_id_resolution() {
        let mut filters = std::collections::HashMap::new();
        filters.insert("conversation_id".to_string(), "C1".to_string());
        assert_eq!(
            Topic::Conversation.resolve_resource_id(&filters),
            "C1"
        );
        assert_eq!(Topic::Presence.resolve_resource_id(&filters), "global");
        assert_eq!(
            Topic::Notifications.resolve_resource_id(&filters),
            "default"
        );
    }

    #[test]
    fn server_message_serializes_expected_shape() {
        let msg = ServerMessage::new(
            ServerMessageType::Error,
            ErrorPayload::new(ErrorCode::UnknownType, "bad"),
        );
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["payload"]["code"], "UNKNOWN_TYPE");
    }
}
