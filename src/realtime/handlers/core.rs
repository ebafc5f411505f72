//! Connection lifecycle and subscription handlers: ping/pong, authenticate,
//! disconnect, subscribe/unsubscribe.

use std::sync::Arc;

use crate::realtime::buffer::FrameClass;
use crate::realtime::connection::CloseReason;
use crate::realtime::error::RealtimeError;
use crate::realtime::hub::Hub;
use crate::realtime::middleware::{Handler, HandlerFuture};
use crate::realtime::protocol::{
    ServerMessage, ServerMessageType, SubscribePayload, SubscribedPayload,
};
use crate::realtime::router::RouteContext;

use super::send_to_self;

pub fn ping_handler() -> Handler {
    Arc::new(|ctx: RouteContext| -> HandlerFuture {
        Box::pin(async move {
            let reply = ServerMessage::reply_to(
                &ctx.message,
                ServerMessageType::Pong,
                serde_json::Value::Null,
            );
            send_to_self(&ctx, &reply, FrameClass::NonCritical);
            Ok(())
        })
    })
}

/// A client-sent `pong` just confirms liveness; activity tracking already
/// happened in the read pump before routing.
pub fn pong_handler() -> Handler {
    Arc::new(|_ctx: RouteContext| -> HandlerFuture { Box::pin(async { Ok(()) }) })
}

/// Token verification happens at the HTTP-upgrade collaborator boundary
/// (§6) before `Hub::Register` is ever called; an in-band `authenticate`
/// message on an already-open connection is just an explicit ack.
pub fn authenticate_handler() -> Handler {
    Arc::new(|ctx: RouteContext| -> HandlerFuture {
        Box::pin(async move {
            let reply = ServerMessage::reply_to(
                &ctx.message,
                ServerMessageType::AuthSuccess,
                serde_json::Value::Null,
            );
            send_to_self(&ctx, &reply, FrameClass::Durable);
            Ok(())
        })
    })
}

pub fn disconnect_handler() -> Handler {
    Arc::new(|ctx: RouteContext| -> HandlerFuture {
        Box::pin(async move {
            let reply = ServerMessage::reply_to(
                &ctx.message,
                ServerMessageType::Disconnected,
                serde_json::json!({ "reason": "client_requested" }),
            );
            send_to_self(&ctx, &reply, FrameClass::Durable);
            ctx.connection.request_close(CloseReason::ClientDisconnect);
            Ok(())
        })
    })
}

pub fn subscribe_handler(hub: Arc<Hub>) -> Handler {
    Arc::new(move |ctx: RouteContext| -> HandlerFuture {
        let hub = hub.clone();
        Box::pin(async move {
            let payload: SubscribePayload = serde_json::from_value(
                ctx.message.payload.clone(),
            )
            .map_err(|e| RealtimeError::ValidationFailed {
                field: "payload".into(),
                message: e.to_string(),
            })?;
            for topic in &payload.topics {
                let resource_id = topic.resolve_resource_id(&payload.filters);
                hub.subscribe(ctx.connection_id, *topic, &resource_id);
            }
            let reply = ServerMessage::reply_to(
                &ctx.message,
                ServerMessageType::Subscribed,
                SubscribedPayload {
                    topics: payload.topics,
                },
            );
            send_to_self(&ctx, &reply, FrameClass::Durable);
            Ok(())
        })
    })
}

pub fn unsubscribe_handler(hub: Arc<Hub>) -> Handler {
    Arc::new(move |ctx: RouteContext| -> HandlerFuture {
        let hub = hub.clone();
        Box::pin(async move {
            let payload: SubscribePayload = serde_json::from_value(
                ctx.message.payload.clone(),
            )
            .map_err(|e| RealtimeError::ValidationFailed {
                field: "payload".into(),
                message: e.to_string(),
            })?;
            for topic in &payload.topics {
                let resource_id = topic.resolve_resource_id(&payload.filters);
                hub.unsubscribe(ctx.connection_id, *topic, &resource_id);
            }
            let reply = ServerMessage::reply_to(
                &ctx.message,
                ServerMessageType::Unsubscribed,
                SubscribedPayload {
                    topics: payload.topics,
                },
            );
            send_to_self(&ctx, &reply, FrameClass::Durable);
            Ok(())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::connection::test_support::test_handle;
    use crate::realtime::protocol::{ClientMessage, ClientMessageType};

    fn ctx_with_payload(payload: serde_json::Value) -> RouteContext {
        let (connection, _probe) = test_handle(1, "d");
        RouteContext {
            message: ClientMessage {
                id: "1".into(),
                msg_type: ClientMessageType::Subscribe,
                payload,
                timestamp: None,
            },
            user_id: 1,
            device_id: "d".into(),
            connection_id: connection.id(),
            connection,
        }
    }

    #[tokio::test]
    async fn ping_replies_pong_with_matching_request_id() {
        let (connection, probe) = test_handle(1, "d");
        let ctx = RouteContext {
            message: crate::realtime::protocol::ClientMessage {
                id: "abc".into(),
                msg_type: ClientMessageType::Ping,
                payload: serde_json::Value::Null,
                timestamp: None,
            },
            user_id: 1,
            device_id: "d".into(),
            connection_id: connection.id(),
            connection,
        };
        ping_handler()(ctx).await.unwrap();
        assert_eq!(probe.outbound_count(), 1);
    }

    #[tokio::test]
    async fn subscribe_registers_with_hub() {
        let hub = Arc::new(Hub::new());
        let payload = serde_json::json!({
            "topics": ["conversation"],
            "filters": { "conversation_id": "C1" },
        });
        let ctx = ctx_with_payload(payload);
        let connection_id = ctx.connection_id;
        subscribe_handler(hub.clone())(ctx).await.unwrap();
        hub.publish(
            crate::realtime::protocol::Topic::Conversation,
            "C1",
            Arc::new(b"hi".to_vec()),
        );
        // No direct assertion hook on the hub's internal set beyond
        // behavior already covered in `hub.rs`; this just checks the
        // handler doesn't error and the connection id was accepted.
        assert!(connection_id > 0);
    }
}
