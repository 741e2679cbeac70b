//! Durable queue storage
//!
//! The [`QueueStore`] trait is the seam between the queue semantics and the
//! backend holding the jobs. Two implementations ship with the crate:
//! - [`RedisStore`]: Redis Streams with a consumer group (production)
//! - [`MemoryStore`]: in-process, driven by tokio's clock (tests, local dev)
//!
//! Stores only do bookkeeping. Connection supervision, operation timeouts and
//! fail-fast behaviour live in [`crate::broker::BrokerConnection`].

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use crate::error::StoreError;
use crate::job::{DeadLetter, Job, JobId, LeaseRef, Resolution};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Ready to be leased
    pub pending: u64,
    /// Currently held by a worker
    pub leased: u64,
    /// Waiting for a retry delay to elapse
    pub delayed: u64,
    /// Retained dead letters
    pub dead_lettered: u64,
}

/// Backend operations the queue is built on.
///
/// Implementations must guarantee single-holder leases: a job is returned by
/// `lease` to at most one caller until it is resolved or its lease expires.
#[async_trait]
pub trait QueueStore: Send + Sync + 'static {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Establish (or re-establish) the underlying connection.
    async fn connect(&self) -> Result<(), StoreError>;

    /// Liveness probe on the current connection.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Persist a new pending job at the tail of the queue.
    ///
    /// Fails with [`StoreError::Full`] when `max_length` jobs are already
    /// unresolved. Accepted jobs are never trimmed.
    async fn enqueue(&self, job: &Job) -> Result<(), StoreError>;

    /// Claim the next job for `consumer`, if any.
    ///
    /// Due retries are promoted first, then expired leases are redelivered,
    /// then the oldest pending job is claimed. A claimed job is `Leased`, has
    /// `leased_at` set and its `attempt` incremented. An expired lease on a
    /// job's final attempt is dead-lettered instead of redelivered.
    async fn lease(&self, consumer: &str) -> Result<Option<Job>, StoreError>;

    /// Mark a leased job completed. Returns `false` when there was nothing
    /// to acknowledge.
    ///
    /// For `ack`, `retry` and `fail`, a pinned [`LeaseRef`] only applies
    /// while the stored attempt still matches, and the check and the update
    /// happen atomically.
    async fn ack(&self, lease: LeaseRef) -> Result<bool, StoreError>;

    /// Return a leased job to pending once `delay` elapses, or dead-letter it
    /// when its attempts are exhausted.
    async fn retry(
        &self,
        lease: LeaseRef,
        delay: Duration,
        reason: &str,
    ) -> Result<Resolution, StoreError>;

    /// Dead-letter a job immediately.
    async fn fail(&self, lease: LeaseRef, reason: &str) -> Result<Resolution, StoreError>;

    /// Look up a job record.
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    async fn stats(&self) -> Result<QueueStats, StoreError>;

    /// Most recent dead letters, newest first.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError>;
}
