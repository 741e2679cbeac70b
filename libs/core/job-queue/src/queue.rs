//! Named durable queue
//!
//! Producer side: [`Queue::enqueue`] / [`Queue::enqueue_payload`].
//! Consumer side: [`Queue::lease`] followed by exactly one of
//! [`Queue::ack`], [`Queue::retry`] or [`Queue::fail`].

use crate::broker::BrokerConnection;
use crate::config::QueueConfig;
use crate::error::{QueueError, RegistryError};
use crate::job::{DeadLetter, Job, JobId, JobPayload, LeaseRef, Resolution};
use crate::metrics::QueueMetrics;
use crate::store::QueueStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A named FIFO queue on top of the shared broker connection.
#[derive(Clone)]
pub struct Queue {
    broker: Arc<BrokerConnection>,
    config: QueueConfig,
    metrics: QueueMetrics,
}

impl Queue {
    pub fn new(broker: Arc<BrokerConnection>, config: QueueConfig) -> Self {
        Self {
            metrics: QueueMetrics::new(&config.name),
            broker,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn consumer_id(&self) -> &str {
        &self.config.consumer_id
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<BrokerConnection> {
        &self.broker
    }

    /// Persist a new pending job and return its id.
    ///
    /// Never waits for a consumer. Fails with `BrokerUnavailable` when the
    /// broker is down or does not answer within the operation timeout; in
    /// that case nothing was persisted.
    pub async fn enqueue(
        &self,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<JobId, QueueError> {
        if kind.trim().is_empty() {
            return Err(RegistryError::EmptyKind.into());
        }

        let job = Job::new(kind, payload, self.config.max_attempts);
        let store = self.broker.store();

        match self.broker.execute("enqueue", store.enqueue(&job)).await {
            Ok(()) => {
                self.metrics.job_enqueued(kind);
                debug!(job_id = %job.id, kind, queue = %self.config.name, "Job enqueued");
                Ok(job.id)
            }
            Err(e) => {
                self.metrics.enqueue_failed(kind);
                Err(e)
            }
        }
    }

    /// Enqueue a typed payload under its declared kind.
    pub async fn enqueue_payload<P: JobPayload>(&self, payload: &P) -> Result<JobId, QueueError> {
        let value = serde_json::to_value(payload)?;
        self.enqueue(P::KIND, value).await
    }

    /// Claim the next job, waiting up to `wait` for one to become available
    /// or for the broker to reconnect. Returns `None` on timeout.
    pub async fn lease(&self, wait: Duration) -> Result<Option<Job>, QueueError> {
        let deadline = Instant::now() + wait;
        let store = self.broker.store();

        loop {
            if !self.broker.is_connected() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() || !self.broker.wait_connected(remaining).await {
                    return Ok(None);
                }
            }

            match self
                .broker
                .execute("lease", store.lease(&self.config.consumer_id))
                .await
            {
                Ok(Some(job)) => {
                    self.metrics.job_leased(&job.kind);
                    debug!(
                        job_id = %job.id,
                        kind = %job.kind,
                        attempt = job.attempt,
                        "Job leased"
                    );
                    return Ok(Some(job));
                }
                Ok(None) => {}
                Err(e) if e.is_broker_unavailable() => {
                    debug!(error = %e, "Lease deferred until the broker reconnects");
                    continue;
                }
                Err(e) => return Err(e),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::time::sleep(self.config.poll_interval.min(remaining)).await;
        }
    }

    /// Mark a job completed. Acking an already completed or unknown job is a
    /// no-op and returns `false`.
    ///
    /// `ack`, `retry` and `fail` accept a bare [`JobId`] or the leased
    /// [`Job`] itself. Passing the job pins the request to that delivery, so
    /// a holder whose lease expired cannot resolve the redelivered job.
    pub async fn ack(&self, lease: impl Into<LeaseRef>) -> Result<bool, QueueError> {
        let lease = lease.into();
        let store = self.broker.store();
        let acked = self.broker.execute("ack", store.ack(lease)).await?;
        if !acked {
            debug!(job_id = %lease.id, "Ack ignored, job not leased");
        }
        Ok(acked)
    }

    /// Return a job to pending after `delay`, or dead-letter it when its
    /// attempts are exhausted. `reason` is kept as the job's last error.
    pub async fn retry(
        &self,
        lease: impl Into<LeaseRef>,
        delay: Duration,
        reason: &str,
    ) -> Result<Resolution, QueueError> {
        let lease = lease.into();
        let store = self.broker.store();
        let resolution = self
            .broker
            .execute("retry", store.retry(lease, delay, reason))
            .await?;
        if resolution == Resolution::Missing {
            warn!(job_id = %lease.id, "Retry requested for a job not leased");
        }
        Ok(resolution)
    }

    /// Dead-letter a job immediately.
    pub async fn fail(
        &self,
        lease: impl Into<LeaseRef>,
        reason: &str,
    ) -> Result<Resolution, QueueError> {
        let lease = lease.into();
        let store = self.broker.store();
        let resolution = self
            .broker
            .execute("fail", store.fail(lease, reason))
            .await?;
        if resolution == Resolution::Missing {
            warn!(job_id = %lease.id, "Fail requested for an unknown or resolved job");
        }
        Ok(resolution)
    }

    pub async fn job(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        let store = self.broker.store();
        self.broker.execute("job", store.get(id)).await
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let store = self.broker.store();
        self.broker.execute("stats", store.stats()).await
    }

    /// Most recent dead letters, newest first.
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
        let store = self.broker.store();
        self.broker
            .execute("dead_letters", store.dead_letters(limit))
            .await
    }
}
