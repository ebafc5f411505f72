//! Thin per-message-type Router handlers (§10.7).
//!
//! None of these own domain logic; they parse the payload just enough to
//! find a topic/resource key, then call into [`Hub`] broadcast/publish.
//! Persistence, auth, and message storage stay out of scope per the
//! Non-goals in §1.

mod calls;
mod core;
mod messaging;
mod presence;
mod typing;

use std::sync::Arc;

use crate::realtime::buffer::FrameClass;
use crate::realtime::hub::Hub;
use crate::realtime::protocol::{ClientMessageType, ServerMessage};
use crate::realtime::router::{MessageRouter, RouteContext};

/// Register every known client message type against `router`.
pub fn register_all(router: &MessageRouter, hub: Arc<Hub>) {
    router.register(ClientMessageType::Ping, core::ping_handler());
    router.register(ClientMessageType::Pong, core::pong_handler());
    router.register(ClientMessageType::Authenticate, core::authenticate_handler());
    router.register(ClientMessageType::Disconnect, core::disconnect_handler());
    router.register(ClientMessageType::Subscribe, core::subscribe_handler(hub.clone()));
    router.register(
        ClientMessageType::Unsubscribe,
        core::unsubscribe_handler(hub.clone()),
    );
    router.register(
        ClientMessageType::PresenceUpdate,
        presence::presence_update_handler(hub.clone()),
    );
    router.register(
        ClientMessageType::PresenceQuery,
        presence::presence_query_handler(hub.clone()),
    );
    router.register(
        ClientMessageType::TypingStart,
        typing::typing_start_handler(hub.clone()),
    );
    router.register(
        ClientMessageType::TypingStop,
        typing::typing_stop_handler(hub.clone()),
    );
    router.register(
        ClientMessageType::MarkRead,
        messaging::mark_read_handler(hub.clone()),
    );
    router.register(
        ClientMessageType::MarkDelivered,
        messaging::mark_delivered_handler(hub.clone()),
    );
    router.register(ClientMessageType::MessageAck, messaging::message_ack_handler());
    router.register(
        ClientMessageType::CallOffer,
        calls::call_offer_handler(hub.clone()),
    );
    router.register(
        ClientMessageType::CallAnswer,
        calls::call_answer_handler(hub.clone()),
    );
    router.register(ClientMessageType::CallIce, calls::call_ice_handler(hub.clone()));
    router.register(ClientMessageType::CallHangup, calls::call_hangup_handler(hub));
}

/// Serialize `msg` and enqueue it on the connection that sent the request
/// it's replying to (or, for a bare broadcast, just skip silently on
/// serialize failure — it would indicate a server bug, not a client one).
fn send_to_self(ctx: &RouteContext, msg: &ServerMessage, class: FrameClass) {
    if let Ok(text) = serde_json::to_string(msg) {
        ctx.connection.send(class, text.into_bytes());
    }
}

fn publish_to_hub(
    hub: &Hub,
    topic: crate::realtime::protocol::Topic,
    resource_id: &str,
    msg: &ServerMessage,
) {
    if let Ok(text) = serde_json::to_string(msg) {
        hub.publish(topic, resource_id, Arc::new(text.into_bytes()));
    }
}
