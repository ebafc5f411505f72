//! Presence handlers: publish updates to the `presence` topic, answer
//! direct online/offline queries from the Hub.

use std::sync::Arc;

use crate::realtime::buffer::FrameClass;
use crate::realtime::error::RealtimeError;
use crate::realtime::hub::Hub;
use crate::realtime::middleware::{Handler, HandlerFuture};
use crate::realtime::protocol::{ServerMessage, ServerMessageType, Topic};
use crate::realtime::router::RouteContext;

use super::{publish_to_hub, send_to_self};

pub fn presence_update_handler(hub: Arc<Hub>) -> Handler {
    Arc::new(move |ctx: RouteContext| -> HandlerFuture {
        let hub = hub.clone();
        Box::pin(async move {
            let server_msg = ServerMessage::new(
                ServerMessageType::PresenceUpdate,
                ctx.message.payload.clone(),
            );
            publish_to_hub(&hub, Topic::Presence, "global", &server_msg);
            Ok(())
        })
    })
}

pub fn presence_query_handler(hub: Arc<Hub>) -> Handler {
    Arc::new(move |ctx: RouteContext| -> HandlerFuture {
        let hub = hub.clone();
        Box::pin(async move {
            let target_user = ctx
                .message
                .payload
                .get("user_id")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| RealtimeError::ValidationFailed {
                    field: "user_id".into(),
                    message: "is required".into(),
                })?;
            let msg_type = if hub.is_online(target_user as i32) {
                ServerMessageType::PresenceOnline
            } else {
                ServerMessageType::PresenceOffline
            };
            let reply = ServerMessage::reply_to(
                &ctx.message,
                msg_type,
                serde_json::json!({ "user_id": target_user }),
            );
            send_to_self(&ctx, &reply, FrameClass::NonCritical);
            Ok(())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::connection::test_support::test_handle;
    use crate::realtime::protocol::ClientMessageType;

    fn ctx(payload: serde_json::Value) -> RouteContext {
        let (connection, _probe) = test_handle(1, "d");
        RouteContext {
            message: crate::realtime::protocol::ClientMessage {
                id: "1".into(),
                msg_type: ClientMessageType::PresenceQuery,
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
    async fn query_reports_offline_for_unknown_user() {
        let hub = Arc::new(Hub::new());
        let (connection, probe) = test_handle(1, "d");
        let c = RouteContext {
            message: crate::realtime::protocol::ClientMessage {
                id: "1".into(),
                msg_type: ClientMessageType::PresenceQuery,
                payload: serde_json::json!({ "user_id": 42 }),
                timestamp: None,
            },
            user_id: 1,
            device_id: "d".into(),
            connection_id: connection.id(),
            connection,
        };
        presence_query_handler(hub)(c).await.unwrap();
        assert_eq!(probe.outbound_count(), 1);
    }

    #[tokio::test]
    async fn query_missing_user_id_is_validation_error() {
        let hub = Arc::new(Hub::new());
        let result = presence_query_handler(hub)(ctx(serde_json::json!({}))).await;
        assert!(matches!(result, Err(RealtimeError::ValidationFailed { .. })));
    }
}
