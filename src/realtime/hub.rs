//! Per-user multi-device registry, broadcast, and subscription index (§4.12).
//!
//! Partitioned by user via `DashMap` rather than one global lock, per the
//! design note in §9 ("partitioned locks per user are preferable to a
//! single global lock"). The Hub spawns no tasks of its own; every operation
//! here is caller-driven, matching §5's scheduling model.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::realtime::connection::{ConnectionHandle, ConnectionId};
use crate::realtime::protocol::Topic;

/// The narrow interface a Connection needs back from the Hub. Kept separate
/// from `Hub` itself so the Connection holds a non-owning reference with
/// only the two methods it uses, per the Hub/Connection cycle note in §9.
pub trait HubHandle: Send + Sync {
    fn unregister(&self, user_id: i32, device_id: &str, connection_id: ConnectionId);
    fn publish(&self, topic: Topic, resource_id: &str, frame: Arc<Vec<u8>>);
}

/// In-memory aggregation of one user's connections across devices.
#[derive(Default)]
struct Client {
    devices: HashMap<String, ConnectionHandle>,
}

type SubscriptionKey = (Topic, String);

pub struct Hub {
    clients: DashMap<i32, Client>,
    /// connection_id -> handle, so Publish doesn't need to know the owning
    /// user to reach a subscriber.
    connections: DashMap<ConnectionId, ConnectionHandle>,
    subscriptions: DashMap<SubscriptionKey, std::collections::HashSet<ConnectionId>>,
    shutdown: tokio::sync::Notify,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            connections: DashMap::new(),
            subscriptions: DashMap::new(),
            shutdown: tokio::sync::Notify::new(),
        }
    }

    /// Register a connection for `user_id`/`device_id`. If a connection is
    /// already registered for the same device, it is closed first (the
    /// explicit-close behavior chosen in §9's first open question) so its
    /// resources are freed deterministically rather than silently
    /// overwritten.
    pub fn register(
        &self,
        user_id: i32,
        device_id: &str,
        handle: ConnectionHandle,
    ) {
        let mut client = self.clients.entry(user_id).or_default();
        if let Some(prior) = client.devices.insert(device_id.to_string(), handle.clone())
        {
            prior.request_close(crate::realtime::connection::CloseReason::Superseded);
            self.connections.remove(&prior.id());
        }
        self.connections.insert(handle.id(), handle);
    }

    /// Remove a connection, but only if `connection_id` still matches the
    /// current entry for that device — guards against a stale cleanup
    /// racing a newer registration, the same race `stream_manager` guards
    /// against with its connection-id check.
    pub fn unregister(&self, user_id: i32, device_id: &str, connection_id: ConnectionId) {
        let mut remove_client = false;
        if let Some(mut client) = self.clients.get_mut(&user_id) {
            let current = client.devices.get(device_id).map(|h| h.id());
            if current == Some(connection_id) {
                client.devices.remove(device_id);
            }
            remove_client = client.devices.is_empty();
        }
        if remove_client {
            self.clients.remove(&user_id);
        }
        self.connections.remove(&connection_id);
        self.subscriptions.retain(|_, subs| {
            subs.remove(&connection_id);
            !subs.is_empty()
        });
    }

    pub fn subscribe(&self, connection_id: ConnectionId, topic: Topic, resource_id: &str) {
        self.subscriptions
            .entry((topic, resource_id.to_string()))
            .or_default()
            .insert(connection_id);
    }

    pub fn unsubscribe(&self, connection_id: ConnectionId, topic: Topic, resource_id: &str) {
        if let Some(mut subs) = self.subscriptions.get_mut(&(topic, resource_id.to_string())) {
            subs.remove(&connection_id);
        }
    }

    /// Deliver `frame` to every device of `user_id`.
    pub fn broadcast(&self, user_id: i32, frame: Arc<Vec<u8>>) {
        if let Some(client) = self.clients.get(&user_id) {
            for handle in client.devices.values() {
                handle.send_shared(
                    crate::realtime::buffer::FrameClass::Durable,
                    frame.clone(),
                );
            }
        }
    }

    /// Deliver `frame` to every device of `user_id` except `except_device`.
    pub fn broadcast_except(&self, user_id: i32, except_device: &str, frame: Arc<Vec<u8>>) {
        if let Some(client) = self.clients.get(&user_id) {
            for (device_id, handle) in &client.devices {
                if device_id == except_device {
                    continue;
                }
                handle.send_shared(
                    crate::realtime::buffer::FrameClass::Durable,
                    frame.clone(),
                );
            }
        }
    }

    /// Deliver `frame` to every connection subscribed to `(topic,
    /// resource_id)`. No ordering guarantee across recipients, per §5.
    pub fn publish(&self, topic: Topic, resource_id: &str, frame: Arc<Vec<u8>>) {
        let class = match topic {
            Topic::Presence | Topic::Typing => {
                crate::realtime::buffer::FrameClass::NonCritical
            }
            _ => crate::realtime::buffer::FrameClass::Durable,
        };
        if let Some(subs) = self.subscriptions.get(&(topic, resource_id.to_string())) {
            for connection_id in subs.iter() {
                if let Some(handle) = self.connections.get(connection_id) {
                    handle.send_shared(class, frame.clone());
                }
            }
        }
    }

    pub fn is_online(&self, user_id: i32) -> bool {
        self.clients
            .get(&user_id)
            .is_some_and(|c| !c.devices.is_empty())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn connection_count(&self) -> usize {
        self.clients.iter().map(|c| c.devices.len()).sum()
    }

    /// Cancel the shutdown signal and close every live connection. Idempotent
    /// in effect (a second call closes an already-empty registry).
    pub fn close(&self) {
        self.shutdown.notify_waiters();
        for client in self.clients.iter() {
            for handle in client.devices.values() {
                handle.request_close(crate::realtime::connection::CloseReason::Shutdown);
            }
        }
    }

    pub fn shutdown_signal(&self) -> &tokio::sync::Notify {
        &self.shutdown
    }
}

impl HubHandle for Hub {
    fn unregister(&self, user_id: i32, device_id: &str, connection_id: ConnectionId) {
        Hub::unregister(self, user_id, device_id, connection_id);
    }

    fn publish(&self, topic: Topic, resource_id: &str, frame: Arc<Vec<u8>>) {
        Hub::publish(self, topic, resource_id, frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::connection::test_support::test_handle;

    #[tokio::test]
    async fn connection_count_equals_sum_of_device_maps() {
        let hub = Hub::new();
        let (h1, _t1) = test_handle(1, "devA");
        let (h2, _t2) = test_handle(1, "devB");
        let (h3, _t3) = test_handle(2, "devA");
        hub.register(1, "devA", h1);
        hub.register(1, "devB", h2);
        hub.register(2, "devA", h3);
        assert_eq!(hub.connection_count(), 3);
        assert_eq!(hub.client_count(), 2);
    }

    #[tokio::test]
    async fn unregister_drops_client_with_zero_devices() {
        let hub = Hub::new();
        let (h1, _t1) = test_handle(1, "devA");
        let id = h1.id();
        hub.register(1, "devA", h1);
        hub.unregister(1, "devA", id);
        assert_eq!(hub.client_count(), 0);
        assert!(!hub.is_online(1));
    }

    #[tokio::test]
    async fn stale_unregister_does_not_remove_newer_connection() {
        let hub = Hub::new();
        let (h1, _t1) = test_handle(1, "devA");
        let stale_id = h1.id();
        hub.register(1, "devA", h1);
        let (h2, _t2) = test_handle(1, "devA");
        hub.register(1, "devA", h2);
        hub.unregister(1, "devA", stale_id);
        assert!(hub.is_online(1));
        assert_eq!(hub.connection_count(), 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_device_broadcast_except_skips_one() {
        let hub = Hub::new();
        let (ha, ta) = test_handle(1, "devA");
        let (hb, tb) = test_handle(1, "devB");
        hub.register(1, "devA", ha);
        hub.register(1, "devB", hb);
        hub.broadcast(1, Arc::new(b"hello".to_vec()));
        assert_eq!(ta.outbound_count(), 1);
        assert_eq!(tb.outbound_count(), 1);

        hub.broadcast_except(1, "devA", Arc::new(b"only-b".to_vec()));
        assert_eq!(ta.outbound_count(), 1);
        assert_eq!(tb.outbound_count(), 2);
    }

    #[tokio::test]
    async fn publish_reaches_only_matching_subscribers() {
        let hub = Hub::new();
        let (ha, ta) = test_handle(1, "devA");
        let (hb, tb) = test_handle(2, "devB");
        let a_id = ha.id();
        let b_id = hb.id();
        hub.register(1, "devA", ha);
        hub.register(2, "devB", hb);
        hub.subscribe(a_id, Topic::Conversation, "C1");
        hub.subscribe(b_id, Topic::Conversation, "C2");
        hub.publish(Topic::Conversation, "C1", Arc::new(b"x".to_vec()));
        assert_eq!(ta.outbound_count(), 1);
        assert_eq!(tb.outbound_count(), 0);
    }

    #[tokio::test]
    async fn unregister_removes_connection_from_every_subscription() {
        let hub = Hub::new();
        let (h, _t) = test_handle(1, "devA");
        let id = h.id();
        hub.register(1, "devA", h);
        hub.subscribe(id, Topic::Conversation, "C1");
        hub.unregister(1, "devA", id);
        assert!(
            !hub.subscriptions
                .get(&(Topic::Conversation, "C1".to_string()))
                .is_some_and(|s| s.contains(&id))
        );
    }
}
