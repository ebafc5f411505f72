//! Composable handler pipeline (§4.9).
//!
//! A [`Middleware`] transforms a [`Handler`] into a [`Handler`]. A
//! [`Chain`] applies its middleware in reverse-registration order, so the
//! first-registered middleware is the outermost — it sees the request first
//! and the response last, the conventional onion-layer ordering. Per the
//! design note in §9, a chain should be composed once per route rather than
//! re-composed on every message; [`Chain::build`] does that composition and
//! hands back a single ready-to-call `Handler`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::realtime::error::RealtimeError;
use crate::realtime::router::RouteContext;

pub type HandlerFuture =
    Pin<Box<dyn Future<Output = Result<(), RealtimeError>> + Send>>;
pub type Handler =
    Arc<dyn Fn(RouteContext) -> HandlerFuture + Send + Sync>;
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

#[derive(Default, Clone)]
pub struct Chain {
    middleware: Vec<Middleware>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, mw: Middleware) -> Self {
        self.middleware.push(mw);
        self
    }

    /// Wrap `terminal` with every registered middleware, outermost first.
    pub fn build(&self, terminal: Handler) -> Handler {
        self.middleware
            .iter()
            .rev()
            .fold(terminal, |inner, mw| mw(inner))
    }
}

/// Rejects empty or oversize payloads before the terminal handler runs.
pub fn message_size_cap(min: usize, max: usize) -> Middleware {
    Arc::new(move |next: Handler| -> Handler {
        Arc::new(move |ctx: RouteContext| -> HandlerFuture {
            let next = next.clone();
            Box::pin(async move {
                let len = ctx.message.payload.to_string().len();
                if len < min || len > max {
                    return Err(RealtimeError::BadFrame(format!(
                        "payload size {len} out of bounds [{min}, {max}]"
                    )));
                }
                next(ctx).await
            })
        })
    })
}

/// Times the terminal handler and records the latency into metrics.
pub fn metrics_timing(
    metrics: Arc<crate::realtime::metrics::MetricsCollector>,
) -> Middleware {
    Arc::new(move |next: Handler| -> Handler {
        let metrics = metrics.clone();
        Arc::new(move |ctx: RouteContext| -> HandlerFuture {
            let next = next.clone();
            let metrics = metrics.clone();
            Box::pin(async move {
                let start = std::time::Instant::now();
                let result = next(ctx).await;
                metrics.record_latency(start.elapsed());
                result
            })
        })
    })
}

/// Structured log line per routed message, mirroring the request/response
/// span pattern of `crate::utils::logger::Logger`.
pub fn structured_logging() -> Middleware {
    Arc::new(|next: Handler| -> Handler {
        Arc::new(move |ctx: RouteContext| -> HandlerFuture {
            let next = next.clone();
            Box::pin(async move {
                let msg_type = ctx.message.msg_type;
                let user_id = ctx.user_id;
                let result = next(ctx).await;
                match &result {
                    Ok(()) => tracing::debug!(?msg_type, user_id, "routed"),
                    Err(err) => {
                        tracing::warn!(?msg_type, user_id, %err, "route failed")
                    }
                }
                result
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::connection::test_support::test_handle;
    use crate::realtime::protocol::{ClientMessage, ClientMessageType};
    use std::sync::Mutex;

    fn ctx() -> RouteContext {
        let (connection, _probe) = test_handle(7, "d1");
        RouteContext {
            message: ClientMessage {
                id: "1".into(),
                msg_type: ClientMessageType::Ping,
                payload: serde_json::Value::Null,
                timestamp: None,
            },
            user_id: 7,
            device_id: "d1".into(),
            connection_id: connection.id(),
            connection,
        }
    }

    #[tokio::test]
    async fn outermost_registered_runs_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mk = |name: &'static str, log: Arc<Mutex<Vec<&'static str>>>| {
            Arc::new(move |next: Handler| -> Handler {
                let log = log.clone();
                Arc::new(move |ctx: RouteContext| -> HandlerFuture {
                    let next = next.clone();
                    let log = log.clone();
                    Box::pin(async move {
                        log.lock().unwrap().push(name);
                        next(ctx).await
                    })
                })
            }) as Middleware
        };
        let chain = Chain::new().with(mk("a", log.clone())).with(mk("b", log.clone()));
        let terminal: Handler = Arc::new(|_ctx| Box::pin(async { Ok(()) }));
        let built = chain.build(terminal);
        built(ctx()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn size_cap_rejects_empty_payload() {
        let mw = message_size_cap(3, 1000);
        let terminal: Handler = Arc::new(|_ctx| Box::pin(async { Ok(()) }));
        let built = mw(terminal);
        let mut c = ctx();
        c.message.payload = serde_json::Value::String(String::new());
        assert!(built(c).await.is_err());
    }
}
