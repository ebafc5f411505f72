//! Typing-indicator handlers: publish to the `typing` topic keyed by
//! `conversation_id` (rate-limited per §4.5, enforced upstream in the read
//! pump before these ever run).

use std::sync::Arc;

use crate::realtime::error::RealtimeError;
use crate::realtime::hub::Hub;
use crate::realtime::middleware::{Handler, HandlerFuture};
use crate::realtime::protocol::{ServerMessage, ServerMessageType, Topic};
use crate::realtime::router::RouteContext;

use super::publish_to_hub;

fn conversation_id(ctx: &RouteContext) -> Result<String, RealtimeError> {
    ctx.message
        .payload
        .get("conversation_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| RealtimeError::ValidationFailed {
            field: "conversation_id".into(),
            message: "is required".into(),
        })
}

fn typing_handler(hub: Arc<Hub>, server_type: ServerMessageType) -> Handler {
    Arc::new(move |ctx: RouteContext| -> HandlerFuture {
        let hub = hub.clone();
        Box::pin(async move {
            let conversation_id = conversation_id(&ctx)?;
            let server_msg =
                ServerMessage::new(server_type, ctx.message.payload.clone());
            publish_to_hub(&hub, Topic::Typing, &conversation_id, &server_msg);
            Ok(())
        })
    })
}

pub fn typing_start_handler(hub: Arc<Hub>) -> Handler {
    typing_handler(hub, ServerMessageType::TypingStart)
}

pub fn typing_stop_handler(hub: Arc<Hub>) -> Handler {
    typing_handler(hub, ServerMessageType::TypingStop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::connection::test_support::test_handle;
    use crate::realtime::protocol::{ClientMessage, ClientMessageType};

    #[tokio::test]
    async fn typing_start_requires_conversation_id() {
        let hub = Arc::new(Hub::new());
        let (connection, _probe) = test_handle(1, "d");
        let ctx = RouteContext {
            message: ClientMessage {
                id: "1".into(),
                msg_type: ClientMessageType::TypingStart,
                payload: serde_json::json!({}),
                timestamp: None,
            },
            user_id: 1,
            device_id: "d".into(),
            connection_id: connection.id(),
            connection,
        };
        let result = typing_start_handler(hub)(ctx).await;
        assert!(matches!(result, Err(RealtimeError::ValidationFailed { .. })));
    }

    #[tokio::test]
    async fn typing_stop_publishes_to_subscribed_conversation() {
        let hub = Arc::new(Hub::new());
        let (subscriber, probe) = test_handle(2, "other");
        hub.register(2, "other", subscriber.clone());
        hub.subscribe(subscriber.id(), Topic::Typing, "C1");

        let (connection, _probe) = test_handle(1, "d");
        let ctx = RouteContext {
            message: ClientMessage {
                id: "1".into(),
                msg_type: ClientMessageType::TypingStop,
                payload: serde_json::json!({ "conversation_id": "C1" }),
                timestamp: None,
            },
            user_id: 1,
            device_id: "d".into(),
            connection_id: connection.id(),
            connection,
        };
        typing_stop_handler(hub)(ctx).await.unwrap();
        assert_eq!(probe.outbound_count(), 1);
    }
}
