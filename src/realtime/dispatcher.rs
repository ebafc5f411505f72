//! Bounded queue + fixed worker pool for off-thread fan-out (§4.11).
//!
//! Used when a publish path would otherwise have to wait on a slow
//! subscriber directly; the Dispatcher absorbs that by handing the work to
//! one of a fixed pool of workers. No retries — a delivery failure is
//! logged and counted, matching the failure-semantics table in §4 ("no
//! retries; delivery failure is logged and counted").

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use tokio::sync::mpsc;

use crate::realtime::metrics::MetricsCollector;

pub struct DispatchItem {
    pub target: u64,
    pub work: Box<
        dyn FnOnce() -> futures::future::BoxFuture<'static, ()> + Send,
    >,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    QueueFull,
    Stopped,
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueueFull => write!(f, "queue full"),
            Self::Stopped => write!(f, "dispatcher stopped"),
        }
    }
}

impl std::error::Error for DispatchError {}

pub struct Dispatcher {
    tx: mpsc::Sender<DispatchItem>,
    stopped: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Spawn `workers` tasks draining a queue bounded at `queue_capacity`.
    pub fn spawn(
        workers: usize,
        queue_capacity: usize,
        metrics: Arc<MetricsCollector>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let stopped = Arc::new(AtomicBool::new(false));

        for worker_id in 0..workers {
            let rx = rx.clone();
            let metrics = metrics.clone();
            let stopped = stopped.clone();
            tokio::spawn(async move {
                loop {
                    let item = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(item) = item else {
                        break;
                    };
                    if stopped.load(Ordering::Relaxed) {
                        continue;
                    }
                    let target = item.target;
                    let fut = (item.work)();
                    let result =
                        std::panic::AssertUnwindSafe(fut).catch_unwind().await;
                    if result.is_err() {
                        tracing::error!(
                            worker_id,
                            target,
                            "dispatcher worker panicked; recovered"
                        );
                        metrics.error("dispatcher_panic");
                    }
                }
            });
        }

        Arc::new(Self { tx, stopped })
    }

    /// Non-blocking send. Fails if the queue is saturated or shutdown has
    /// begun.
    pub fn dispatch(&self, item: DispatchItem) -> Result<(), DispatchError> {
        if self.stopped.load(Ordering::Relaxed) {
            return Err(DispatchError::Stopped);
        }
        self.tx.try_send(item).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Stopped,
        })
    }

    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn dispatched_work_executes() {
        let metrics = Arc::new(MetricsCollector::new());
        let dispatcher = Dispatcher::spawn(2, 8, metrics);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        dispatcher
            .dispatch(DispatchItem {
                target: 1,
                work: Box::new(move || {
                    let counter = counter2.clone();
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stopped_dispatcher_rejects_new_work() {
        let metrics = Arc::new(MetricsCollector::new());
        let dispatcher = Dispatcher::spawn(1, 4, metrics);
        dispatcher.shutdown();
        let result = dispatcher.dispatch(DispatchItem {
            target: 1,
            work: Box::new(|| Box::pin(async {})),
        });
        assert_eq!(result, Err(DispatchError::Stopped));
    }

    #[tokio::test]
    async fn full_queue_is_reported_without_blocking() {
        let metrics = Arc::new(MetricsCollector::new());
        // Zero workers: nothing drains the queue, so it saturates quickly.
        let dispatcher = Dispatcher::spawn(0, 1, metrics);
        dispatcher
            .dispatch(DispatchItem {
                target: 1,
                work: Box::new(|| Box::pin(async {})),
            })
            .unwrap();
        let result = dispatcher.dispatch(DispatchItem {
            target: 1,
            work: Box::new(|| Box::pin(async {})),
        });
        assert_eq!(result, Err(DispatchError::QueueFull));
    }
}
