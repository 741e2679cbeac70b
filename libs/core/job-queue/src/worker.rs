//! Worker pool
//!
//! N executors share one [`WorkerContext`]. Each loops lease -> dispatch ->
//! resolve until shutdown:
//!
//! ```text
//! unknown kind          -> fail("unknown kind")      no retry consumed
//! Ok(())                -> ack
//! Transient | timeout   -> retry(backoff(attempt))   dead-letter when exhausted
//!   | panic
//! Permanent             -> fail(reason)
//! ```

use crate::config::WorkerConfig;
use crate::error::{HandlerError, QueueError};
use crate::job::{Job, Resolution};
use crate::metrics::QueueMetrics;
use crate::queue::Queue;
use crate::registry::HandlerRegistry;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Reason recorded for jobs whose kind has no handler.
pub const UNKNOWN_KIND: &str = "unknown kind";

/// How a dispatched job was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Retrying { delay: Duration },
    DeadLettered { reason: String },
    /// The store no longer considered this lease current (expired and
    /// redelivered, or already resolved)
    Stale,
}

/// Everything an executor needs, constructed once and shared.
#[derive(Clone)]
pub struct WorkerContext {
    queue: Queue,
    registry: HandlerRegistry,
    config: WorkerConfig,
    metrics: QueueMetrics,
}

impl WorkerContext {
    pub fn new(queue: Queue, registry: HandlerRegistry, config: WorkerConfig) -> Self {
        Self {
            metrics: QueueMetrics::new(queue.name()),
            queue,
            registry,
            config,
        }
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }
}

/// Run one leased job through its handler and resolve it.
pub async fn dispatch(ctx: &WorkerContext, job: Job) -> Result<Outcome, QueueError> {
    let Some(handler) = ctx.registry.get(&job.kind) else {
        warn!(job_id = %job.id, kind = %job.kind, "No handler registered for kind");
        let resolution = ctx.queue.fail(&job, UNKNOWN_KIND).await?;
        return Ok(dead_letter_outcome(ctx, &job, resolution, "unknown_kind"));
    };

    debug!(
        job_id = %job.id,
        kind = %job.kind,
        attempt = job.attempt,
        handler = handler.name(),
        "Dispatching job"
    );

    let timeout = ctx.config.execution_timeout;
    let started = Instant::now();
    let result = tokio::time::timeout(
        timeout,
        AssertUnwindSafe(handler.handle(&job)).catch_unwind(),
    )
    .await;
    let elapsed = started.elapsed();

    let failure = match result {
        Ok(Ok(Ok(()))) => None,
        Ok(Ok(Err(e))) => Some(e),
        Ok(Err(panic)) => Some(HandlerError::transient(format!(
            "handler panicked: {}",
            panic_message(panic.as_ref())
        ))),
        Err(_) => Some(HandlerError::transient(format!(
            "handler timed out after {}ms",
            timeout.as_millis()
        ))),
    };

    let Some(failure) = failure else {
        ctx.metrics.handler_duration(&job.kind, "completed", elapsed);
        if !ctx.queue.ack(&job).await? {
            warn!(job_id = %job.id, "Lease no longer current, ack ignored");
            return Ok(Outcome::Stale);
        }
        ctx.metrics.job_completed(&job.kind);
        info!(
            job_id = %job.id,
            kind = %job.kind,
            attempt = job.attempt,
            duration_ms = elapsed.as_millis() as u64,
            "Job completed"
        );
        return Ok(Outcome::Completed);
    };

    let category = failure.category();
    ctx.metrics
        .handler_duration(&job.kind, category.as_str(), elapsed);
    let reason = failure.to_string();

    if !category.should_retry() {
        error!(job_id = %job.id, kind = %job.kind, error = %reason, "Job failed permanently");
        let resolution = ctx.queue.fail(&job, &reason).await?;
        return Ok(dead_letter_outcome(ctx, &job, resolution, "permanent"));
    }

    let delay = ctx.config.retry_backoff.delay_with_jitter(job.attempt);
    match ctx.queue.retry(&job, delay, &reason).await? {
        Resolution::Rescheduled => {
            ctx.metrics.job_retried(&job.kind);
            warn!(
                job_id = %job.id,
                kind = %job.kind,
                attempt = job.attempt,
                max_attempts = job.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %reason,
                "Job failed, retry scheduled"
            );
            Ok(Outcome::Retrying { delay })
        }
        resolution => Ok(dead_letter_outcome(ctx, &job, resolution, "exhausted")),
    }
}

fn dead_letter_outcome(
    ctx: &WorkerContext,
    job: &Job,
    resolution: Resolution,
    class: &str,
) -> Outcome {
    match resolution {
        Resolution::DeadLettered(reason) => {
            ctx.metrics.job_dead_lettered(&job.kind, class);
            error!(
                job_id = %job.id,
                kind = %job.kind,
                attempt = job.attempt,
                %reason,
                "Job dead-lettered"
            );
            Outcome::DeadLettered { reason }
        }
        Resolution::Rescheduled => Outcome::Retrying {
            delay: Duration::ZERO,
        },
        Resolution::Missing => Outcome::Stale,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

/// Pool of concurrent executors.
pub struct WorkerPool {
    ctx: WorkerContext,
}

impl WorkerPool {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Run the executors until `shutdown` flips to true.
    ///
    /// Executors stop leasing once shutdown is signalled and finish the job
    /// they hold; `run` returns when all of them have stopped.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        let config = &self.ctx.config;
        config
            .validate_against(self.ctx.queue.config())
            .map_err(|e| QueueError::Config(e.to_string()))?;

        if self.ctx.registry.is_empty() {
            warn!("Worker pool starting without handlers, every job will be dead-lettered");
        }

        info!(
            queue = %self.ctx.queue.name(),
            consumer_id = %self.ctx.queue.consumer_id(),
            concurrency = config.concurrency,
            execution_timeout_ms = config.execution_timeout.as_millis() as u64,
            kinds = ?self.ctx.registry.kinds(),
            "Starting worker pool"
        );

        let mut executors = JoinSet::new();
        for index in 0..config.concurrency {
            executors.spawn(run_executor(index, self.ctx.clone(), shutdown.clone()));
        }

        while let Some(joined) = executors.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Executor task aborted");
            }
        }

        info!("Worker pool stopped");
        Ok(())
    }
}

async fn run_executor(index: usize, ctx: WorkerContext, mut shutdown: watch::Receiver<bool>) {
    debug!(executor = index, "Executor started");

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        match ctx.queue.lease(ctx.config.lease_wait).await {
            Ok(Some(job)) => {
                let job_id = job.id;
                ctx.metrics.in_flight(1.0);
                let resolved = dispatch(&ctx, job).await;
                ctx.metrics.in_flight(-1.0);

                match resolved {
                    Ok(outcome) => debug!(executor = index, %job_id, ?outcome, "Job resolved"),
                    Err(e) => {
                        error!(executor = index, %job_id, error = %e, "Failed to resolve job, lease will expire")
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!(executor = index, error = %e, "Lease failed");
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(ctx.queue.config().poll_interval) => {}
                }
            }
        }
    }

    debug!(executor = index, "Executor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let static_str: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(static_str.as_ref()), "boom");

        let owned: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(owned.as_ref()), "kaboom");

        let other: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
