//! Per-socket state machine: read pump, write pump, heartbeat (§4.13).
//!
//! A Connection owns exactly two tasks, per §5's scheduling model: the read
//! pump (decode → rate-limit → validate → dispatch) and the write pump
//! (drain the outbound ring, emit heartbeat pings, honor close grace). They
//! communicate only through [`ConnectionState`]'s atomics, ring buffer, and
//! `Notify` handles — neither task awaits the other directly.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::Instrument;

use crate::realtime::buffer::{FrameClass, RingBuffer};
use crate::realtime::dispatcher::{DispatchItem, Dispatcher};
use crate::realtime::error::RealtimeError;
use crate::realtime::hub::HubHandle;
use crate::realtime::lifecycle::{HookContext, LifecycleManager, Phase};
use crate::realtime::metrics::MetricsCollector;
use crate::realtime::protocol::{
    ClientMessage, RawEnvelope, ServerMessage, ServerMessageType,
};
use crate::realtime::rate_limit::{SlidingWindow, TokenBucket};
use crate::realtime::repository::ConnectionRepository;
use crate::realtime::router::{MessageRouter, RouteContext};
use crate::realtime::transport::{Frame, Transport, TransportError, TransportWriter, TransportReader};
use crate::realtime::validator::ValidationRegistry;

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Metadata handed to the Connection by the HTTP-upgrade collaborator,
/// per §6.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub platform: Option<String>,
    pub app_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Idle,
    TransportFail,
    Backpressure,
    Shutdown,
    ClientDisconnect,
    AbuseLimit,
    Superseded,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle-close",
            Self::TransportFail => "write-fail-close",
            Self::Backpressure => "BACKPRESSURE",
            Self::Shutdown => "shutdown",
            Self::ClientDisconnect => "client-disconnect",
            Self::AbuseLimit => "abuse-limit",
            Self::Superseded => "superseded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    Active = 0,
    Closing = 1,
    Closed = 2,
}

impl ConnectionStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Active,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Enqueued,
    Dropped,
    ClosedBackpressure,
    RejectedClosed,
}

/// Fixed budgets applied by the read/write pumps, mirroring
/// `RealtimeConfig`'s field names one-to-one.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub read_deadline: Duration,
    pub write_deadline: Duration,
    pub heartbeat_interval: Duration,
    pub close_grace: Duration,
    pub ring_buffer_capacity: usize,
    pub max_frame_bytes: usize,
    pub abuse_close_threshold: u32,
    pub abuse_window: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_deadline: Duration::from_secs(60),
            write_deadline: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(25),
            close_grace: Duration::from_secs(2),
            ring_buffer_capacity: 256,
            max_frame_bytes: 64 * 1024,
            abuse_close_threshold: 10,
            abuse_window: Duration::from_secs(60),
        }
    }
}

/// The exact-count limiters a Connection consults before routing, per
/// §4.5. `abuse` tracks repeated policy violations on this connection and
/// trips `AbuseLimit` once `abuse_close_threshold` is hit within the window.
#[derive(Clone)]
pub struct RateLimiters {
    pub messages: Arc<TokenBucket>,
    pub presence: Arc<SlidingWindow>,
    pub typing: Arc<SlidingWindow>,
    pub abuse: Arc<SlidingWindow>,
}

struct ConnectionState {
    id: ConnectionId,
    user_id: i32,
    device_id: String,
    meta: ConnectionMeta,
    status: AtomicU8,
    close_reason: Mutex<Option<CloseReason>>,
    last_activity: Mutex<Instant>,
    outbound: Mutex<RingBuffer>,
    writer_notify: Notify,
    close_notify: Notify,
    metrics: Arc<MetricsCollector>,
    hub: Arc<dyn HubHandle>,
    lifecycle: Arc<LifecycleManager>,
    repository: Arc<dyn ConnectionRepository>,
    send_attempts: AtomicUsize,
}

impl ConnectionState {
    /// Transition to Closed exactly once, running the side effects
    /// (metrics, hub deregistration, lifecycle hooks, persistence) only on
    /// the call that wins the race. The hooks and the repository write run
    /// off-thread: neither can block the pump that triggered the close, and
    /// neither is allowed to affect in-memory correctness (§10.5).
    fn finalize_closed(&self) {
        let prior = self.status.swap(
            ConnectionStatus::Closed as u8,
            Ordering::AcqRel,
        );
        if prior != ConnectionStatus::Closed as u8 {
            self.metrics.connection_closed();
            self.hub.unregister(self.user_id, &self.device_id, self.id);

            let reason = *self.close_reason.lock().expect("poisoned");
            let ctx = HookContext {
                user_id: Some(self.user_id),
                device_id: Some(self.device_id.clone()),
                connection_id: Some(self.id),
                note: reason.map(|r| r.as_str().to_string()),
            };
            let lifecycle = self.lifecycle.clone();
            let repository = self.repository.clone();
            let connection_id = self.id;
            tokio::spawn(async move {
                if let Err(err) =
                    lifecycle.run(Phase::AfterDisconnect, ctx.clone()).await
                {
                    tracing::warn!(%err, "after_disconnect hook failed");
                }
                if reason == Some(CloseReason::TransportFail) {
                    if let Err(err) = lifecycle.run(Phase::OnError, ctx).await {
                        tracing::warn!(%err, "on_error hook failed");
                    }
                }
                if let Err(err) = repository.delete_connection(connection_id).await {
                    tracing::warn!(%err, "failed to persist connection close");
                }
            });
        }
    }
}

#[derive(Clone)]
pub struct ConnectionHandle(Arc<ConnectionState>);

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.0.id
    }

    pub fn user_id(&self) -> i32 {
        self.0.user_id
    }

    pub fn device_id(&self) -> &str {
        &self.0.device_id
    }

    pub fn meta(&self) -> &ConnectionMeta {
        &self.0.meta
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.0.status.load(Ordering::Acquire))
    }

    pub fn touch_activity(&self) {
        *self.0.last_activity.lock().expect("poisoned") = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.0.last_activity.lock().expect("poisoned").elapsed()
    }

    pub fn send(&self, class: FrameClass, bytes: Vec<u8>) -> SendOutcome {
        self.send_shared(class, Arc::new(bytes))
    }

    /// Shared-ownership variant so Hub broadcast/publish fan-out can hand
    /// the same encoded frame to many connections without re-copying it
    /// per recipient.
    pub fn send_shared(
        &self,
        class: FrameClass,
        bytes: Arc<Vec<u8>>,
    ) -> SendOutcome {
        self.0.send_attempts.fetch_add(1, Ordering::Relaxed);
        if self.status() == ConnectionStatus::Closed {
            self.0.metrics.message_dropped();
            return SendOutcome::RejectedClosed;
        }
        let mut buf = self.0.outbound.lock().expect("ring buffer poisoned");
        match class {
            FrameClass::NonCritical => {
                if buf.is_full() {
                    buf.write_dropping_oldest(&bytes);
                    drop(buf);
                    self.0.metrics.message_dropped();
                    self.0.writer_notify.notify_one();
                    SendOutcome::Dropped
                } else {
                    buf.write(&bytes).expect("checked not full");
                    drop(buf);
                    self.0.writer_notify.notify_one();
                    SendOutcome::Enqueued
                }
            }
            FrameClass::Durable => match buf.write(&bytes) {
                Ok(()) => {
                    drop(buf);
                    self.0.writer_notify.notify_one();
                    SendOutcome::Enqueued
                }
                Err(_) => {
                    drop(buf);
                    self.request_close(CloseReason::Backpressure);
                    SendOutcome::ClosedBackpressure
                }
            },
        }
    }

    /// Request the connection close with `reason`. Idempotent; doesn't
    /// block on the pumps actually exiting.
    pub fn request_close(&self, reason: CloseReason) {
        if self.status() == ConnectionStatus::Closed {
            return;
        }
        *self.0.close_reason.lock().expect("poisoned") = Some(reason);
        self.0.status.store(ConnectionStatus::Closing as u8, Ordering::Release);
        self.0.close_notify.notify_waiters();
        self.0.writer_notify.notify_one();
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.0.close_reason.lock().expect("poisoned")
    }
}

/// Launch the read pump and write pump for a newly upgraded socket and
/// return the handle callers (the HTTP-upgrade collaborator, then the Hub)
/// use to address it.
#[allow(clippy::too_many_arguments)]
pub fn spawn_connection(
    transport: Box<dyn Transport>,
    user_id: i32,
    device_id: String,
    meta: ConnectionMeta,
    hub: Arc<dyn HubHandle>,
    router: Arc<MessageRouter>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<MetricsCollector>,
    limiters: RateLimiters,
    validators: Arc<ValidationRegistry>,
    config: ConnectionConfig,
    lifecycle: Arc<LifecycleManager>,
    repository: Arc<dyn ConnectionRepository>,
) -> ConnectionHandle {
    let id = next_connection_id();
    let state = Arc::new(ConnectionState {
        id,
        user_id,
        device_id,
        meta,
        status: AtomicU8::new(ConnectionStatus::Active as u8),
        close_reason: Mutex::new(None),
        last_activity: Mutex::new(Instant::now()),
        outbound: Mutex::new(RingBuffer::new(config.ring_buffer_capacity)),
        writer_notify: Notify::new(),
        close_notify: Notify::new(),
        metrics: metrics.clone(),
        hub: hub.clone(),
        lifecycle: lifecycle.clone(),
        repository,
        send_attempts: AtomicUsize::new(0),
    });
    let handle = ConnectionHandle(state);
    metrics.connection_opened();

    let span = tracing::info_span!(
        "connection",
        connection_id = id,
        user_id = handle.user_id(),
        device_id = %handle.device_id(),
    );

    let greeting = ServerMessage::new(ServerMessageType::Connected, serde_json::Value::Null);
    if let Ok(text) = serde_json::to_string(&greeting) {
        handle.send(FrameClass::Durable, text.into_bytes());
    }

    {
        let lifecycle = lifecycle.clone();
        let ctx = HookContext {
            user_id: Some(handle.user_id()),
            device_id: Some(handle.device_id().to_string()),
            connection_id: Some(id),
            note: None,
        };
        tokio::spawn(async move {
            if let Err(err) = lifecycle.run(Phase::AfterConnect, ctx).await {
                tracing::warn!(%err, "after_connect hook failed");
            }
        });
    }

    let (writer, reader) = transport.split();

    tokio::spawn(
        write_pump(handle.clone(), writer, config.clone())
            .instrument(span.clone()),
    );
    tokio::spawn(
        read_pump(
            handle.clone(),
            reader,
            router,
            dispatcher,
            metrics,
            limiters,
            validators,
            config,
        )
        .instrument(span),
    );

    handle
}

async fn write_with_deadline(
    writer: &mut Box<dyn TransportWriter>,
    frame: Frame,
    deadline: Duration,
) -> Result<(), TransportError> {
    match tokio::time::timeout(deadline, writer.write_frame(frame)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Io("write deadline exceeded".into())),
    }
}

/// Drain every currently-queued frame. Returns `Err` on the first transport
/// failure, leaving any remaining queued frames in place.
async fn drain_all(
    handle: &ConnectionHandle,
    writer: &mut Box<dyn TransportWriter>,
    write_deadline: Duration,
) -> Result<(), ()> {
    loop {
        let bytes = {
            let mut buf = handle.0.outbound.lock().expect("poisoned");
            buf.read()
        };
        let Some(bytes) = bytes else {
            return Ok(());
        };
        let Ok(text) = String::from_utf8(bytes) else {
            continue;
        };
        let len = text.len();
        if write_with_deadline(writer, Frame::Text(text), write_deadline)
            .await
            .is_err()
        {
            handle.0.metrics.message_send_failed();
            return Err(());
        }
        handle.0.metrics.message_sent(len);
    }
}

async fn write_pump(
    handle: ConnectionHandle,
    mut writer: Box<dyn TransportWriter>,
    config: ConnectionConfig,
) {
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Consume the immediate first tick so heartbeat cadence starts at
    // `heartbeat_interval`, not immediately.
    heartbeat.tick().await;

    loop {
        match handle.status() {
            ConnectionStatus::Closed => return,
            ConnectionStatus::Closing => {
                let _ = tokio::time::timeout(
                    config.close_grace,
                    drain_all(&handle, &mut writer, config.write_deadline),
                )
                .await;
                writer.close().await;
                handle.0.finalize_closed();
                return;
            }
            ConnectionStatus::Active => {
                tokio::select! {
                    () = handle.0.writer_notify.notified() => {
                        if drain_all(&handle, &mut writer, config.write_deadline).await.is_err() {
                            handle.request_close(CloseReason::TransportFail);
                        }
                    }
                    _ = heartbeat.tick() => {
                        if write_with_deadline(&mut writer, Frame::Ping, config.write_deadline).await.is_err() {
                            tracing::warn!("heartbeat ping failed");
                            handle.request_close(CloseReason::TransportFail);
                        }
                    }
                    () = handle.0.close_notify.notified() => {}
                }
            }
        }
    }
}

fn send_error(
    handle: &ConnectionHandle,
    request_id: Option<String>,
    err: RealtimeError,
) {
    handle.0.metrics.error(match &err {
        RealtimeError::BadFrame(_) => "bad_frame",
        RealtimeError::UnknownType(_) => "unknown_type",
        RealtimeError::RateLimited => "rate_limited",
        RealtimeError::ValidationFailed { .. } => "validation_failed",
        RealtimeError::Unauthorized => "unauthorized",
        RealtimeError::NotSubscribed => "not_subscribed",
        RealtimeError::Internal => "internal",
    });
    let mut msg =
        ServerMessage::new(ServerMessageType::Error, err.to_payload());
    msg.request_id = request_id;
    if let Ok(text) = serde_json::to_string(&msg) {
        handle.send(FrameClass::NonCritical, text.into_bytes());
    }
}

/// Record one policy violation against the abuse window; returns true once
/// the connection has exceeded `abuse_close_threshold` violations within
/// the window and should be closed.
fn note_policy_violation(limiters: &RateLimiters, handle: &ConnectionHandle) -> bool {
    !limiters.abuse.allow(&handle.id().to_string())
}

#[allow(clippy::too_many_arguments)]
async fn read_pump(
    handle: ConnectionHandle,
    mut reader: Box<dyn TransportReader>,
    router: Arc<MessageRouter>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<MetricsCollector>,
    limiters: RateLimiters,
    validators: Arc<ValidationRegistry>,
    config: ConnectionConfig,
) {
    loop {
        if handle.status() != ConnectionStatus::Active {
            return;
        }

        let frame = match tokio::time::timeout(
            config.read_deadline,
            reader.read_frame(),
        )
        .await
        {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) => {
                handle.request_close(CloseReason::TransportFail);
                return;
            }
            Err(_) => {
                handle.request_close(CloseReason::Idle);
                return;
            }
        };
        handle.touch_activity();

        let text = match frame {
            Frame::Close => {
                handle.request_close(CloseReason::ClientDisconnect);
                return;
            }
            Frame::Ping | Frame::Pong => continue,
            Frame::Text(text) => text,
        };

        metrics.message_received(text.len());
        if text.len() > config.max_frame_bytes {
            send_error(
                &handle,
                None,
                RealtimeError::BadFrame("frame exceeds max_frame_bytes".into()),
            );
            continue;
        }

        let raw: RawEnvelope = match serde_json::from_str(&text) {
            Ok(raw) => raw,
            Err(e) => {
                send_error(&handle, None, RealtimeError::BadFrame(e.to_string()));
                continue;
            }
        };
        let request_id = raw.id.clone();
        let message = match ClientMessage::from_raw(raw) {
            Some(message) => message,
            None => {
                send_error(
                    &handle,
                    Some(request_id),
                    RealtimeError::UnknownType("unrecognized".into()),
                );
                continue;
            }
        };

        if let Err(err) = check_rate_limit(&limiters, &handle, &message) {
            send_error(&handle, Some(message.id.clone()), err);
            if note_policy_violation(&limiters, &handle) {
                handle.request_close(CloseReason::AbuseLimit);
                return;
            }
            continue;
        }

        if let Err(err) = validators.validate(message.msg_type, &message.payload) {
            send_error(&handle, Some(message.id.clone()), err);
            continue;
        }

        let ctx = RouteContext {
            user_id: handle.user_id(),
            device_id: handle.device_id().to_string(),
            connection_id: handle.id(),
            connection: handle.clone(),
            message,
        };
        let target = handle.id();
        let metrics_for_work = metrics.clone();
        let router_for_work = router.clone();
        let dispatch_result = dispatcher.dispatch(DispatchItem {
            target,
            work: Box::new(move || {
                Box::pin(async move {
                    if let Err(err) = router_for_work.route(ctx).await {
                        metrics_for_work.error("route_failed");
                        tracing::warn!(%err, "handler error");
                    }
                })
            }),
        });
        if dispatch_result.is_err() {
            metrics.error("dispatch_rejected");
            send_error(&handle, None, RealtimeError::Internal);
        }
    }
}

fn check_rate_limit(
    limiters: &RateLimiters,
    handle: &ConnectionHandle,
    message: &ClientMessage,
) -> Result<(), RealtimeError> {
    use crate::realtime::protocol::ClientMessageType;

    let admitted = match message.msg_type {
        ClientMessageType::PresenceUpdate | ClientMessageType::PresenceQuery => {
            limiters.presence.allow(&handle.id().to_string())
        }
        ClientMessageType::TypingStart | ClientMessageType::TypingStop => {
            let conversation = message
                .payload
                .get("conversation_id")
                .and_then(|v| v.as_str())
                .unwrap_or("default");
            limiters
                .typing
                .allow(&format!("{}:{conversation}", handle.id()))
        }
        _ => limiters.messages.allow(&handle.id().to_string()),
    };
    if admitted {
        Ok(())
    } else {
        Err(RealtimeError::RateLimited)
    }
}

/// Test-only constructors shared by `hub.rs`, `router.rs`, and
/// `middleware.rs` tests: a `ConnectionHandle` with no pumps running, backed
/// by a no-op Hub, so fan-out/routing logic can be tested without spinning
/// up a real socket.
#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::realtime::protocol::Topic;

    struct NoopHub;
    impl HubHandle for NoopHub {
        fn unregister(&self, _user_id: i32, _device_id: &str, _connection_id: ConnectionId) {}
        fn publish(&self, _topic: Topic, _resource_id: &str, _frame: Arc<Vec<u8>>) {}
    }

    pub struct NoopRepository;

    #[salvo::async_trait]
    impl crate::realtime::repository::ConnectionRepository for NoopRepository {
        async fn create_connection(
            &self,
            _connection_id: ConnectionId,
            _user_id: i32,
            _device_id: &str,
            _meta: &ConnectionMeta,
        ) -> Result<(), crate::realtime::repository::RepositoryError> {
            Ok(())
        }

        async fn update_connection_status(
            &self,
            _connection_id: ConnectionId,
            _status: crate::realtime::repository::ConnectionStatus,
        ) -> Result<(), crate::realtime::repository::RepositoryError> {
            Ok(())
        }

        async fn delete_connection(
            &self,
            _connection_id: ConnectionId,
        ) -> Result<(), crate::realtime::repository::RepositoryError> {
            Ok(())
        }

        async fn get_active_connections(
            &self,
            _user_id: i32,
        ) -> Result<Vec<crate::models::ConnectionRecord>, crate::realtime::repository::RepositoryError>
        {
            Ok(Vec::new())
        }

        async fn cleanup_stale_connections(
            &self,
            _older_than: chrono::Duration,
        ) -> Result<usize, crate::realtime::repository::RepositoryError> {
            Ok(0)
        }
    }

    pub struct TestProbe(ConnectionHandle);

    impl TestProbe {
        /// Number of `send`/`send_shared` calls this handle has received,
        /// regardless of enqueue/drop outcome.
        pub fn outbound_count(&self) -> usize {
            self.0.0.send_attempts.load(Ordering::Relaxed)
        }
    }

    pub fn test_handle(user_id: i32, device_id: &str) -> (ConnectionHandle, TestProbe) {
        let state = Arc::new(ConnectionState {
            id: next_connection_id(),
            user_id,
            device_id: device_id.to_string(),
            meta: ConnectionMeta::default(),
            status: AtomicU8::new(ConnectionStatus::Active as u8),
            close_reason: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            outbound: Mutex::new(RingBuffer::new(64)),
            writer_notify: Notify::new(),
            close_notify: Notify::new(),
            metrics: Arc::new(MetricsCollector::new()),
            hub: Arc::new(NoopHub),
            lifecycle: Arc::new(LifecycleManager::new()),
            repository: Arc::new(NoopRepository),
            send_attempts: AtomicUsize::new(0),
        });
        let handle = ConnectionHandle(state);
        (handle.clone(), TestProbe(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_handle;
    use super::*;

    #[test]
    fn non_critical_send_drops_oldest_when_full() {
        let (handle, probe) = test_handle(1, "d");
        for i in 0..64u8 {
            handle.send(FrameClass::NonCritical, vec![i]);
        }
        assert_eq!(
            handle.send(FrameClass::NonCritical, vec![99]),
            SendOutcome::Dropped
        );
        assert_eq!(probe.outbound_count(), 65);
    }

    #[test]
    fn durable_send_closes_connection_on_overflow() {
        let (handle, _probe) = test_handle(1, "d");
        for i in 0..64u8 {
            assert_eq!(
                handle.send(FrameClass::Durable, vec![i]),
                SendOutcome::Enqueued
            );
        }
        let outcome = handle.send(FrameClass::Durable, vec![99]);
        assert_eq!(outcome, SendOutcome::ClosedBackpressure);
        assert_eq!(handle.status(), ConnectionStatus::Closing);
        assert_eq!(handle.close_reason(), Some(CloseReason::Backpressure));
    }

    #[test]
    fn send_after_close_is_rejected_and_counted() {
        let (handle, _probe) = test_handle(1, "d");
        handle.request_close(CloseReason::Shutdown);
        handle.0.finalize_closed();
        let outcome = handle.send(FrameClass::NonCritical, vec![1]);
        assert_eq!(outcome, SendOutcome::RejectedClosed);
    }

    #[test]
    fn request_close_is_idempotent_after_finalized() {
        let (handle, _probe) = test_handle(1, "d");
        handle.request_close(CloseReason::Idle);
        handle.0.finalize_closed();
        handle.request_close(CloseReason::ClientDisconnect);
        assert_eq!(handle.status(), ConnectionStatus::Closed);
    }
}

/// End-to-end handshake tests driving `spawn_connection` over the mock
/// transport (no real socket, no HTTP upgrade) with a real Hub, Router, and
/// Dispatcher — the closest equivalent to a network integration test that
/// doesn't require standing up authenticated HTTP session state just to
/// reach the WebSocket core under test.
#[cfg(test)]
mod handshake_tests {
    use std::time::Duration;

    use super::*;
    use crate::realtime::dispatcher::Dispatcher;
    use crate::realtime::hub::{Hub, HubHandle};
    use crate::realtime::metrics::MetricsCollector;
    use crate::realtime::middleware::Chain;
    use crate::realtime::rate_limit::{SlidingWindow, TokenBucket};
    use crate::realtime::router::MessageRouter;
    use crate::realtime::transport::mock;
    use crate::realtime::validator::ValidationRegistry;

    fn harness() -> (
        Arc<dyn HubHandle>,
        Arc<MessageRouter>,
        Arc<Dispatcher>,
        Arc<MetricsCollector>,
        RateLimiters,
        Arc<ValidationRegistry>,
        ConnectionConfig,
        Arc<LifecycleManager>,
        Arc<dyn crate::realtime::repository::ConnectionRepository>,
    ) {
        let hub = Arc::new(Hub::new());
        let metrics = Arc::new(MetricsCollector::new());
        let router = Arc::new(MessageRouter::new(Chain::new()));
        crate::realtime::handlers::register_all(&router, hub.clone());
        let dispatcher = Dispatcher::spawn(2, 64, metrics.clone());
        let limiters = RateLimiters {
            messages: Arc::new(TokenBucket::new(1000.0, 1000)),
            presence: Arc::new(SlidingWindow::new(1000, Duration::from_secs(1))),
            typing: Arc::new(SlidingWindow::new(1000, Duration::from_secs(1))),
            abuse: Arc::new(SlidingWindow::new(1000, Duration::from_secs(60))),
        };
        (
            hub as Arc<dyn HubHandle>,
            router,
            dispatcher,
            metrics,
            limiters,
            Arc::new(ValidationRegistry::new()),
            ConnectionConfig::default(),
            Arc::new(LifecycleManager::new()),
            Arc::new(super::test_support::NoopRepository),
        )
    }

    fn outbound_types(state: &mock::MockState) -> Vec<String> {
        state
            .outbound
            .lock()
            .unwrap()
            .iter()
            .filter_map(|frame| match frame {
                crate::realtime::transport::Frame::Text(text) => {
                    serde_json::from_str::<serde_json::Value>(text)
                        .ok()
                        .and_then(|v| v.get("type").and_then(|t| t.as_str().map(str::to_string)))
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn authenticate_then_unknown_type_round_trip() {
        let (hub, router, dispatcher, metrics, limiters, validators, config, lifecycle, repository) =
            harness();
        let (state, transport) = mock::transport();
        {
            let mut inbound = state.inbound.lock().unwrap();
            inbound.push_back(crate::realtime::transport::Frame::Text(
                serde_json::json!({
                    "id": "req-1",
                    "type": "authenticate",
                    "payload": {},
                })
                .to_string(),
            ));
            inbound.push_back(crate::realtime::transport::Frame::Text(
                serde_json::json!({
                    "id": "req-2",
                    "type": "does.not.exist",
                    "payload": {},
                })
                .to_string(),
            ));
        }

        let _handle = spawn_connection(
            Box::new(transport),
            1,
            "device-a".into(),
            ConnectionMeta::default(),
            hub,
            router,
            dispatcher,
            metrics,
            limiters,
            validators,
            config,
            lifecycle,
            repository,
        );

        // Let the dispatcher workers and write pump settle.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let types = outbound_types(&state);
        assert!(
            types.contains(&"connected".to_string()),
            "expected a connected greeting in {types:?}"
        );
        assert!(
            types.contains(&"auth.success".to_string()),
            "expected auth.success in {types:?}"
        );
        assert!(
            types.contains(&"error".to_string()),
            "expected an error frame for the unrecognized type in {types:?}"
        );
    }
}
