//! Realtime WebSocket fan-out core: Hub, per-connection state machine,
//! typed wire protocol, routing/middleware, worker-pool dispatch, rate
//! limiting, validation, metrics, lifecycle and health aggregation.
//!
//! This module owns everything the spec calls the "core": decoding and
//! validating inbound frames, routing them to handlers, and fanning server
//! messages back out to subscribed connections. It does not own message
//! persistence, auth, or presence storage beyond what's needed to answer
//! "is this user online right now" (Non-goals).

pub mod buffer;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod health;
pub mod hub;
pub mod lifecycle;
pub mod metrics;
pub mod middleware;
pub mod pool;
pub mod protocol;
pub mod rate_limit;
pub mod repository;
pub mod router;
pub mod transport;
pub mod validator;

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use crate::realtime::connection::{ConnectionConfig, RateLimiters};
use crate::realtime::dispatcher::Dispatcher;
use crate::realtime::hub::Hub;
use crate::realtime::lifecycle::LifecycleManager;
use crate::realtime::metrics::MetricsCollector;
use crate::realtime::middleware::Chain;
use crate::realtime::protocol::ClientMessageType;
use crate::realtime::rate_limit::{SlidingWindow, TokenBucket};
use crate::realtime::repository::{ConnectionRepository, DieselConnectionRepository};
use crate::realtime::router::MessageRouter;
use crate::realtime::validator::{FieldRules, Rule, ValidationRegistry};

/// Process-wide collaborators for the realtime core, built once from
/// config and shared by every connection. Mirrors the teacher's
/// `StreamManager::global()` singleton pattern.
pub struct RealtimeCore {
    pub hub: Arc<Hub>,
    pub dispatcher: Arc<Dispatcher>,
    pub router: Arc<MessageRouter>,
    pub metrics: Arc<MetricsCollector>,
    pub validators: Arc<ValidationRegistry>,
    pub repository: Arc<dyn ConnectionRepository>,
    pub connection_config: ConnectionConfig,
    pub lifecycle: Arc<LifecycleManager>,
    limiters: RateLimiters,
}

/// Rules mirror the handlers' own hand-rolled field checks (`conversation_id`
/// in `handlers::messaging`/`handlers::typing`, `call_id` in
/// `handlers::calls`) so a malformed payload is rejected by the validator
/// before it reaches the handler, per §4.6.
fn build_validators() -> ValidationRegistry {
    let conversation_required = FieldRules::new().field("conversation_id", vec![Rule::Required]);
    let call_id_required = FieldRules::new().field("call_id", vec![Rule::Required]);

    ValidationRegistry::new()
        .register(ClientMessageType::TypingStart, conversation_required.clone())
        .register(ClientMessageType::TypingStop, conversation_required.clone())
        .register(ClientMessageType::MarkRead, conversation_required.clone())
        .register(ClientMessageType::MarkDelivered, conversation_required)
        .register(ClientMessageType::CallOffer, call_id_required.clone())
        .register(ClientMessageType::CallAnswer, call_id_required.clone())
        .register(ClientMessageType::CallIce, call_id_required.clone())
        .register(ClientMessageType::CallHangup, call_id_required)
}

impl RealtimeCore {
    fn new() -> Self {
        let cfg = crate::config::get().realtime.clone();
        let metrics = Arc::new(MetricsCollector::new());
        let hub = Arc::new(Hub::new());
        let dispatcher = Dispatcher::spawn(
            cfg.dispatcher_workers,
            cfg.dispatcher_queue_capacity,
            metrics.clone(),
        );
        let router = MessageRouter::new(Chain::new());
        handlers::register_all(&router, hub.clone());
        let connection_config = ConnectionConfig {
            read_deadline: Duration::from_secs(cfg.read_deadline_secs),
            write_deadline: Duration::from_secs(cfg.write_deadline_secs),
            heartbeat_interval: Duration::from_secs(cfg.heartbeat_interval_secs),
            close_grace: Duration::from_secs(cfg.close_grace_secs),
            ring_buffer_capacity: cfg.ring_buffer_capacity,
            max_frame_bytes: cfg.max_frame_bytes,
            abuse_close_threshold: cfg.abuse_close_threshold,
            abuse_window: Duration::from_secs(60),
        };

        let messages = Arc::new(TokenBucket::new(
            cfg.per_connection_rate as f64,
            cfg.per_connection_burst,
        ));
        let presence = Arc::new(SlidingWindow::new(cfg.presence_rate, Duration::from_secs(1)));
        let typing = Arc::new(SlidingWindow::new(cfg.typing_rate, Duration::from_secs(1)));
        let abuse = Arc::new(SlidingWindow::new(
            connection_config.abuse_close_threshold,
            connection_config.abuse_window,
        ));

        {
            let messages = messages.clone();
            let presence = presence.clone();
            let typing = typing.clone();
            let abuse = abuse.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(60));
                loop {
                    ticker.tick().await;
                    let idle = Duration::from_secs(600);
                    messages.sweep(idle);
                    presence.sweep(idle);
                    typing.sweep(idle);
                    abuse.sweep(idle);
                }
            });
        }

        Self {
            hub,
            dispatcher,
            router: Arc::new(router),
            metrics,
            validators: Arc::new(build_validators()),
            repository: Arc::new(DieselConnectionRepository::new()),
            connection_config,
            lifecycle: Arc::new(LifecycleManager::new()),
            limiters: RateLimiters {
                messages,
                presence,
                typing,
                abuse,
            },
        }
    }

    pub fn global() -> &'static Self {
        static INSTANCE: LazyLock<RealtimeCore> = LazyLock::new(RealtimeCore::new);
        &INSTANCE
    }

    /// Shared rate limiters for a newly spawned connection. These are
    /// process-wide singletons keyed internally by connection id, not
    /// fresh per call, matching §4.5's exact-count admission model.
    pub fn rate_limiters(&self) -> RateLimiters {
        self.limiters.clone()
    }

    pub fn health_report(&self) -> health::HealthReport {
        health::report(&self.hub, &self.dispatcher, &self.metrics)
    }
}
