//! Call-signaling relay handlers: offer/answer/ice/hangup, all fanned out
//! on the `calls` topic as durable frames (dropping a signaling frame would
//! break the call, unlike presence/typing).

use std::sync::Arc;

use crate::realtime::error::RealtimeError;
use crate::realtime::hub::Hub;
use crate::realtime::middleware::{Handler, HandlerFuture};
use crate::realtime::protocol::{ServerMessage, ServerMessageType, Topic};
use crate::realtime::router::RouteContext;

use super::publish_to_hub;

fn call_id(ctx: &RouteContext) -> Result<String, RealtimeError> {
    ctx.message
        .payload
        .get("call_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| RealtimeError::ValidationFailed {
            field: "call_id".into(),
            message: "is required".into(),
        })
}

fn relay_call(hub: Arc<Hub>, server_type: ServerMessageType) -> Handler {
    Arc::new(move |ctx: RouteContext| -> HandlerFuture {
        let hub = hub.clone();
        Box::pin(async move {
            let call_id = call_id(&ctx)?;
            let server_msg =
                ServerMessage::new(server_type, ctx.message.payload.clone());
            publish_to_hub(&hub, Topic::Calls, &call_id, &server_msg);
            Ok(())
        })
    })
}

/// A `call.offer` rings the callee, so it's relayed as `call.incoming`.
pub fn call_offer_handler(hub: Arc<Hub>) -> Handler {
    relay_call(hub, ServerMessageType::CallIncoming)
}

pub fn call_answer_handler(hub: Arc<Hub>) -> Handler {
    relay_call(hub, ServerMessageType::CallAnswer)
}

pub fn call_ice_handler(hub: Arc<Hub>) -> Handler {
    relay_call(hub, ServerMessageType::CallIce)
}

/// A `call.hangup` ends the call for every other party on the topic.
pub fn call_hangup_handler(hub: Arc<Hub>) -> Handler {
    relay_call(hub, ServerMessageType::CallEnded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::connection::test_support::test_handle;
    use crate::realtime::protocol::{ClientMessage, ClientMessageType};

    #[tokio::test]
    async fn offer_without_call_id_is_rejected() {
        let hub = Arc::new(Hub::new());
        let (connection, _probe) = test_handle(1, "d");
        let ctx = RouteContext {
            message: ClientMessage {
                id: "1".into(),
                msg_type: ClientMessageType::CallOffer,
                payload: serde_json::json!({}),
                timestamp: None,
            },
            user_id: 1,
            device_id: "d".into(),
            connection_id: connection.id(),
            connection,
        };
        let result = call_offer_handler(hub)(ctx).await;
        assert!(matches!(result, Err(RealtimeError::ValidationFailed { .. })));
    }

    #[tokio::test]
    async fn hangup_reaches_other_party_on_the_call() {
        let hub = Arc::new(Hub::new());
        let (callee, probe) = test_handle(2, "callee");
        hub.register(2, "callee", callee.clone());
        hub.subscribe(callee.id(), Topic::Calls, "call-1");

        let (connection, _probe) = test_handle(1, "d");
        let ctx = RouteContext {
            message: ClientMessage {
                id: "1".into(),
                msg_type: ClientMessageType::CallHangup,
                payload: serde_json::json!({ "call_id": "call-1" }),
                timestamp: None,
            },
            user_id: 1,
            device_id: "d".into(),
            connection_id: connection.id(),
            connection,
        };
        call_hangup_handler(hub)(ctx).await.unwrap();
        assert_eq!(probe.outbound_count(), 1);
    }
}
