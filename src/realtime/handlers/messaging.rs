//! Read-receipt and ack handlers. No message storage here — this core
//! does not own persistence of message content (Non-goals, §1).

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

fn receipt_handler(hub: Arc<Hub>, server_type: ServerMessageType) -> Handler {
    Arc::new(move |ctx: RouteContext| -> HandlerFuture {
        let hub = hub.clone();
        Box::pin(async move {
            let conversation_id = conversation_id(&ctx)?;
            let server_msg =
                ServerMessage::new(server_type, ctx.message.payload.clone());
            publish_to_hub(&hub, Topic::Conversation, &conversation_id, &server_msg);
            Ok(())
        })
    })
}

pub fn mark_read_handler(hub: Arc<Hub>) -> Handler {
    receipt_handler(hub, ServerMessageType::MessageRead)
}

pub fn mark_delivered_handler(hub: Arc<Hub>) -> Handler {
    receipt_handler(hub, ServerMessageType::MessageDelivered)
}

/// Acks are fire-and-forget from the core's perspective: no persistence
/// layer here to confirm against, so there's nothing to reply with.
pub fn message_ack_handler() -> Handler {
    Arc::new(|_ctx: RouteContext| -> HandlerFuture { Box::pin(async { Ok(()) }) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::connection::test_support::test_handle;
    use crate::realtime::protocol::{ClientMessage, ClientMessageType};

    #[tokio::test]
    async fn mark_read_publishes_to_conversation_topic() {
        let hub = Arc::new(Hub::new());
        let (subscriber, probe) = test_handle(2, "other");
        hub.register(2, "other", subscriber.clone());
        hub.subscribe(subscriber.id(), Topic::Conversation, "C1");

        let (connection, _probe) = test_handle(1, "d");
        let ctx = RouteContext {
            message: ClientMessage {
                id: "1".into(),
                msg_type: ClientMessageType::MarkRead,
                payload: serde_json::json!({ "conversation_id": "C1" }),
                timestamp: None,
            },
            user_id: 1,
            device_id: "d".into(),
            connection_id: connection.id(),
            connection,
        };
        mark_read_handler(hub)(ctx).await.unwrap();
        assert_eq!(probe.outbound_count(), 1);
    }
}
