//! Phase-keyed hook registry (§4.8).
//!
//! Hooks run in registration order; the first failing hook aborts the chain
//! and its error is handed back to whoever called [`LifecycleManager::run`].
//! `before_connect` failure denies the connection; `before_message` failure
//! suppresses routing — callers are expected to check the `Result` and act
//! accordingly, this module only sequences the hooks.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use crate::realtime::error::RealtimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    BeforeConnect,
    AfterConnect,
    BeforeDisconnect,
    AfterDisconnect,
    BeforeMessage,
    AfterMessage,
    OnError,
}

/// Context passed to every hook. Deliberately small: hooks observe
/// identifiers, not full connection state.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub user_id: Option<i32>,
    pub device_id: Option<String>,
    pub connection_id: Option<u64>,
    pub note: Option<String>,
}

pub type HookFuture =
    Pin<Box<dyn Future<Output = Result<(), RealtimeError>> + Send>>;
pub type Hook = std::sync::Arc<
    dyn Fn(HookContext) -> HookFuture + Send + Sync,
>;

#[derive(Default)]
pub struct LifecycleManager {
    hooks: RwLock<HashMap<Phase, Vec<Hook>>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, phase: Phase, hook: Hook) {
        self.hooks
            .write()
            .expect("lifecycle lock poisoned")
            .entry(phase)
            .or_default()
            .push(hook);
    }

    /// Execute all hooks registered for `phase` in order, aborting at the
    /// first failure.
    pub async fn run(
        &self,
        phase: Phase,
        ctx: HookContext,
    ) -> Result<(), RealtimeError> {
        let hooks: Vec<Hook> = self
            .hooks
            .read()
            .expect("lifecycle lock poisoned")
            .get(&phase)
            .cloned()
            .unwrap_or_default();
        for hook in hooks {
            hook(ctx.clone()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ok_hook(counter: Arc<AtomicUsize>) -> Hook {
        Arc::new(move |_ctx| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    fn failing_hook() -> Hook {
        Arc::new(|_ctx| {
            Box::pin(async move { Err(RealtimeError::Internal) })
        })
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let manager = LifecycleManager::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            manager.register(
                Phase::AfterConnect,
                Arc::new(move |_ctx| {
                    let order = order.clone();
                    Box::pin(async move {
                        order.lock().unwrap().push(i);
                        Ok(())
                    })
                }),
            );
        }
        manager
            .run(Phase::AfterConnect, HookContext::default())
            .await
            .unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn first_failure_aborts_chain() {
        let manager = LifecycleManager::new();
        let counter = Arc::new(AtomicUsize::new(0));
        manager.register(Phase::BeforeMessage, failing_hook());
        manager.register(Phase::BeforeMessage, ok_hook(counter.clone()));
        let result = manager
            .run(Phase::BeforeMessage, HookContext::default())
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
