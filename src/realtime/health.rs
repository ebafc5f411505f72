//! Aggregated liveness status of the realtime core (§2, "Health (core
//! liveness only)"). Distinct from the teacher's database/cache HTTP health
//! handlers, which stay out of scope per §1.

use std::sync::Arc;

use serde::Serialize;

use crate::realtime::dispatcher::Dispatcher;
use crate::realtime::hub::Hub;
use crate::realtime::metrics::MetricsCollector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: Status,
    pub connections: usize,
    pub clients: usize,
    pub error_rate: f64,
    pub reasons: Vec<String>,
}

/// Thresholds beyond which the core is reported degraded/unhealthy. Kept
/// deliberately simple: this is a liveness signal, not an SLO engine.
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub max_connections: usize,
    pub degraded_error_rate: f64,
    pub unhealthy_error_rate: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_connections: 50_000,
            degraded_error_rate: 0.05,
            unhealthy_error_rate: 0.25,
        }
    }
}

pub fn check(
    hub: &Hub,
    dispatcher_stopped: bool,
    metrics: &Arc<MetricsCollector>,
    thresholds: &HealthThresholds,
) -> HealthReport {
    let connections = hub.connection_count();
    let clients = hub.client_count();
    let snapshot = metrics.snapshot();
    let total = snapshot.messages_received.max(1);
    let error_rate = snapshot.errors_total as f64 / total as f64;

    let mut reasons = Vec::new();
    let mut status = Status::Healthy;

    if dispatcher_stopped {
        status = Status::Unhealthy;
        reasons.push("dispatcher is stopped".to_string());
    }
    if connections > thresholds.max_connections {
        status = Status::Unhealthy;
        reasons.push(format!(
            "connection count {connections} exceeds {}",
            thresholds.max_connections
        ));
    }
    if error_rate >= thresholds.unhealthy_error_rate {
        status = Status::Unhealthy;
        reasons.push(format!("error rate {error_rate:.3} over threshold"));
    } else if error_rate >= thresholds.degraded_error_rate && status == Status::Healthy {
        status = Status::Degraded;
        reasons.push(format!("error rate {error_rate:.3} elevated"));
    }

    HealthReport {
        status,
        connections,
        clients,
        error_rate,
        reasons,
    }
}

/// Convenience wrapper bundling the collaborators `check` needs, so the
/// HTTP health route (out of core scope per §1) has one call to make.
pub fn report(
    hub: &Hub,
    dispatcher: &Dispatcher,
    metrics: &Arc<MetricsCollector>,
) -> HealthReport {
    check(hub, dispatcher.is_stopped(), metrics, &HealthThresholds::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_hub_with_no_errors_is_healthy() {
        let hub = Hub::new();
        let metrics = Arc::new(MetricsCollector::new());
        let report = check(&hub, false, &metrics, &HealthThresholds::default());
        assert_eq!(report.status, Status::Healthy);
    }

    #[test]
    fn stopped_dispatcher_is_unhealthy() {
        let hub = Hub::new();
        let metrics = Arc::new(MetricsCollector::new());
        let report = check(&hub, true, &metrics, &HealthThresholds::default());
        assert_eq!(report.status, Status::Unhealthy);
    }

    #[test]
    fn high_error_rate_degrades_then_fails() {
        let hub = Hub::new();
        let metrics = Arc::new(MetricsCollector::new());
        metrics.message_received(1);
        for _ in 0..10 {
            metrics.error("bad_frame");
        }
        let thresholds = HealthThresholds {
            max_connections: 50_000,
            degraded_error_rate: 0.05,
            unhealthy_error_rate: 0.25,
        };
        let report = check(&hub, false, &metrics, &thresholds);
        assert_eq!(report.status, Status::Unhealthy);
    }
}
