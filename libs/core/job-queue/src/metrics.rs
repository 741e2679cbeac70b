//! Prometheus metrics for the job queue
//!
//! Provides observability into queue throughput, failures and broker health.

use crate::error::QueueError;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() -> Result<(), QueueError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| QueueError::Config(format!("failed to install metrics recorder: {e}")))?;
        info!("Prometheus metrics initialized");
        Ok::<_, QueueError>(handle)
    })?;
    Ok(())
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

/// Broker connection state as a gauge (0 disconnected, 1 reconnecting, 2 connected)
pub fn broker_state(value: u8) {
    gauge!("job_queue_broker_state").set(f64::from(value));
}

/// Record a reconnect attempt by the broker supervisor
pub fn reconnect_attempt() {
    counter!("job_queue_broker_reconnect_attempts_total").increment(1);
}

/// Per-queue metrics helper
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    queue: String,
}

impl QueueMetrics {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }

    pub fn job_enqueued(&self, kind: &str) {
        counter!(
            "job_queue_jobs_enqueued_total",
            "queue" => self.queue.clone(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    /// Producer-side failure (broker unavailable or rejected write)
    pub fn enqueue_failed(&self, kind: &str) {
        counter!(
            "job_queue_enqueue_failures_total",
            "queue" => self.queue.clone(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    pub fn job_leased(&self, kind: &str) {
        counter!(
            "job_queue_jobs_leased_total",
            "queue" => self.queue.clone(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    pub fn job_completed(&self, kind: &str) {
        counter!(
            "job_queue_jobs_completed_total",
            "queue" => self.queue.clone(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    pub fn job_retried(&self, kind: &str) {
        counter!(
            "job_queue_jobs_retried_total",
            "queue" => self.queue.clone(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    /// `reason` is a low-cardinality class such as `permanent` or `unknown_kind`
    pub fn job_dead_lettered(&self, kind: &str, reason: &str) {
        counter!(
            "job_queue_jobs_dead_lettered_total",
            "queue" => self.queue.clone(),
            "kind" => kind.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    pub fn lease_expired(&self) {
        counter!(
            "job_queue_lease_expirations_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    pub fn handler_duration(&self, kind: &str, outcome: &str, duration: Duration) {
        histogram!(
            "job_queue_handler_duration_seconds",
            "queue" => self.queue.clone(),
            "kind" => kind.to_string(),
            "outcome" => outcome.to_string()
        )
        .record(duration.as_secs_f64());
    }

    pub fn in_flight(&self, delta: f64) {
        gauge!(
            "job_queue_jobs_in_flight",
            "queue" => self.queue.clone()
        )
        .increment(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_without_recorder_is_empty() {
        if prometheus_handle().is_none() {
            assert!(render_metrics().is_empty());
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = QueueMetrics::new("test");
        metrics.job_enqueued("notify-admin");
        metrics.job_dead_lettered("notify-admin", "permanent");
        metrics.handler_duration("notify-admin", "completed", Duration::from_millis(5));
        assert_eq!(metrics.queue, "test");
    }
}
