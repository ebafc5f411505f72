//! Message type → handler dispatch with a middleware chain (§4.10).
//!
//! Registration takes an exclusive lock; routing reads take a shared lock,
//! so steady-state traffic never contends with itself, only with the rare
//! dynamic reconfiguration call.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::realtime::connection::ConnectionHandle;
use crate::realtime::error::RealtimeError;
use crate::realtime::middleware::{Chain, Handler, HandlerFuture};
use crate::realtime::protocol::{ClientMessage, ClientMessageType};

/// Everything a handler needs to act: the parsed message, the identity of
/// the connection that sent it, and a handle back to that connection so a
/// direct reply can be enqueued before the handler returns (the causal
/// ordering guarantee in §5).
#[derive(Clone)]
pub struct RouteContext {
    pub message: ClientMessage,
    pub user_id: i32,
    pub device_id: String,
    pub connection_id: u64,
    pub connection: ConnectionHandle,
}

pub struct MessageRouter {
    routes: RwLock<HashMap<ClientMessageType, Handler>>,
    fallback: RwLock<Option<Handler>>,
    chain: Chain,
}

impl MessageRouter {
    pub fn new(chain: Chain) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            fallback: RwLock::new(None),
            chain,
        }
    }

    /// Register a handler for `msg_type`, pre-composing it with the
    /// router's middleware chain once (not on every call).
    pub fn register(&self, msg_type: ClientMessageType, handler: Handler) {
        let built = self.chain.build(handler);
        self.routes
            .write()
            .expect("router lock poisoned")
            .insert(msg_type, built);
    }

    pub fn set_fallback(&self, handler: Handler) {
        *self.fallback.write().expect("router lock poisoned") =
            Some(self.chain.build(handler));
    }

    pub fn has_handler(&self, msg_type: ClientMessageType) -> bool {
        self.routes
            .read()
            .expect("router lock poisoned")
            .contains_key(&msg_type)
    }

    pub fn unregister(&self, msg_type: ClientMessageType) {
        self.routes
            .write()
            .expect("router lock poisoned")
            .remove(&msg_type);
    }

    /// Resolve a handler for `ctx.message.msg_type` and run it. Falls back
    /// to the configured fallback handler, or a bare not-found error if none
    /// was set.
    pub async fn route(
        &self,
        ctx: RouteContext,
    ) -> Result<(), RealtimeError> {
        let handler = {
            let routes = self.routes.read().expect("router lock poisoned");
            routes.get(&ctx.message.msg_type).cloned()
        };
        match handler {
            Some(h) => h(ctx).await,
            None => {
                let fallback =
                    self.fallback.read().expect("router lock poisoned").clone();
                match fallback {
                    Some(f) => f(ctx).await,
                    None => Err(RealtimeError::UnknownType(format!(
                        "{:?}",
                        ctx.message.msg_type
                    ))),
                }
            }
        }
    }
}

fn route_future(
    result: Result<(), RealtimeError>,
) -> HandlerFuture {
    Box::pin(async move { result })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::connection::test_support::test_handle;
    use crate::realtime::protocol::ClientMessageType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn msg(t: ClientMessageType) -> ClientMessage {
        ClientMessage {
            id: "1".into(),
            msg_type: t,
            payload: serde_json::Value::Null,
            timestamp: None,
        }
    }

    fn ctx(t: ClientMessageType) -> RouteContext {
        let (connection, _probe) = test_handle(1, "d");
        RouteContext {
            message: msg(t),
            user_id: 1,
            device_id: "d".into(),
            connection_id: connection.id(),
            connection,
        }
    }

    #[tokio::test]
    async fn routes_to_registered_handler() {
        let router = MessageRouter::new(Chain::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        router.register(
            ClientMessageType::Ping,
            Arc::new(move |_ctx| {
                let hits = hits2.clone();
                route_future({
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );
        router.route(ctx(ClientMessageType::Ping)).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_type_without_fallback_errors() {
        let router = MessageRouter::new(Chain::new());
        let result = router.route(ctx(ClientMessageType::Ping)).await;
        assert!(matches!(result, Err(RealtimeError::UnknownType(_))));
    }

    #[tokio::test]
    async fn fallback_handles_unregistered_types() {
        let router = MessageRouter::new(Chain::new());
        router.set_fallback(Arc::new(|_ctx| {
            route_future(Err(RealtimeError::UnknownType("fallback".into())))
        }));
        let result = router.route(ctx(ClientMessageType::Ping)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unregister_removes_handler() {
        let router = MessageRouter::new(Chain::new());
        router.register(
            ClientMessageType::Ping,
            Arc::new(|_ctx| route_future(Ok(()))),
        );
        assert!(router.has_handler(ClientMessageType::Ping));
        router.unregister(ClientMessageType::Ping);
        assert!(!router.has_handler(ClientMessageType::Ping));
    }
}
