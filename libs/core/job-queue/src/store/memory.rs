//! In-memory queue store
//!
//! Keeps the same bookkeeping as the Redis store in a mutex-guarded state.
//! All deadlines use `tokio::time::Instant`, so tests running on a paused
//! clock control lease expiry, retry delays and retention exactly.

use super::{QueueStats, QueueStore};
use crate::config::QueueConfig;
use crate::error::StoreError;
use crate::job::{DeadLetter, Job, JobId, JobStatus, LeaseRef, Resolution};
use crate::metrics::QueueMetrics;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

struct Record {
    job: Job,
    lease_deadline: Option<Instant>,
    expires_at: Option<Instant>,
}

struct Delayed {
    due: Instant,
    seq: u64,
    id: JobId,
}

struct DeadEntry {
    letter: DeadLetter,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    records: HashMap<JobId, Record>,
    ready: VecDeque<JobId>,
    delayed: Vec<Delayed>,
    dead: VecDeque<DeadEntry>,
    seq: u64,
}

impl State {
    fn purge(&mut self, now: Instant) {
        self.records
            .retain(|_, record| record.expires_at.is_none_or(|at| at > now));
        self.dead.retain(|entry| entry.expires_at > now);
    }

    /// Move due retries to the tail of the ready queue, oldest due first.
    fn promote(&mut self, now: Instant) {
        self.delayed.sort_by_key(|d| (d.due, d.seq));
        let split = self.delayed.partition_point(|d| d.due <= now);
        for entry in self.delayed.drain(..split) {
            self.ready.push_back(entry.id);
        }
    }

    fn expired_lease(&self, now: Instant) -> Option<JobId> {
        self.records
            .iter()
            .filter(|(_, r)| r.job.status == JobStatus::Leased)
            .filter_map(|(id, r)| r.lease_deadline.map(|at| (at, *id)))
            .filter(|(at, _)| *at <= now)
            .min_by_key(|(at, _)| *at)
            .map(|(_, id)| id)
    }

    fn claim(&mut self, id: JobId, now: Instant, lease_timeout: Duration) -> Option<Job> {
        let record = self.records.get_mut(&id)?;
        record.job.attempt += 1;
        record.job.status = JobStatus::Leased;
        record.job.leased_at = Some(Utc::now());
        record.lease_deadline = Some(now + lease_timeout);
        Some(record.job.clone())
    }

    fn dead_letter(
        &mut self,
        id: JobId,
        reason: &str,
        now: Instant,
        retention: Duration,
    ) -> Resolution {
        let Some(record) = self.records.get_mut(&id) else {
            return Resolution::Missing;
        };

        record.job.status = JobStatus::DeadLettered;
        record.job.last_error = Some(reason.to_string());
        record.lease_deadline = None;
        record.expires_at = Some(now + retention);

        self.dead.push_back(DeadEntry {
            letter: DeadLetter::from_job(&record.job, reason),
            expires_at: now + retention,
        });

        Resolution::DeadLettered(reason.to_string())
    }

    fn status_of(&self, id: &JobId) -> Option<JobStatus> {
        self.records.get(id).map(|r| r.job.status)
    }
}

/// Queue store held entirely in process memory.
///
/// Nothing survives a restart. `set_available(false)` makes every operation
/// fail with a connection error, which is how tests simulate a broker outage.
pub struct MemoryStore {
    config: QueueConfig,
    metrics: QueueMetrics,
    state: Mutex<State>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            metrics: QueueMetrics::new(&config.name),
            config,
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going away or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of job records currently held, whatever their status.
    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Connection("memory store unavailable".into()))
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn enqueue(&self, job: &Job) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state();

        let backlog = state
            .records
            .values()
            .filter(|r| !r.job.status.is_terminal())
            .count() as u64;
        if backlog >= self.config.max_length {
            return Err(StoreError::Full {
                backlog,
                limit: self.config.max_length,
            });
        }

        state.records.insert(
            job.id,
            Record {
                job: job.clone(),
                lease_deadline: None,
                expires_at: None,
            },
        );
        state.ready.push_back(job.id);
        Ok(())
    }

    async fn lease(&self, consumer: &str) -> Result<Option<Job>, StoreError> {
        self.check()?;
        let now = Instant::now();
        let mut state = self.state();

        state.purge(now);
        state.promote(now);

        while let Some(id) = state.expired_lease(now) {
            let Some(record) = state.records.get(&id) else {
                break;
            };
            if record.job.attempts_exhausted() {
                let reason = format!("lease expired after {} attempts", record.job.attempt);
                warn!(job_id = %id, %reason, "Dead-lettering job with expired final lease");
                self.metrics.job_dead_lettered(&record.job.kind, "lease_expired");
                state.dead_letter(id, &reason, now, self.config.dead_letter_retention);
                continue;
            }

            debug!(job_id = %id, consumer, "Redelivering job with expired lease");
            self.metrics.lease_expired();
            return Ok(state.claim(id, now, self.config.lease_timeout));
        }

        while let Some(id) = state.ready.pop_front() {
            if state.status_of(&id) == Some(JobStatus::Pending) {
                return Ok(state.claim(id, now, self.config.lease_timeout));
            }
        }

        Ok(None)
    }

    async fn ack(&self, lease: LeaseRef) -> Result<bool, StoreError> {
        self.check()?;
        let now = Instant::now();
        let mut state = self.state();

        match state.records.get_mut(&lease.id) {
            Some(record)
                if record.job.status == JobStatus::Leased && lease.matches(record.job.attempt) =>
            {
                record.job.status = JobStatus::Completed;
                record.lease_deadline = None;
                record.expires_at = Some(now + self.config.completed_retention);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn retry(
        &self,
        lease: LeaseRef,
        delay: Duration,
        reason: &str,
    ) -> Result<Resolution, StoreError> {
        self.check()?;
        let now = Instant::now();
        let mut state = self.state();
        let id = lease.id;

        let Some(record) = state.records.get_mut(&id) else {
            return Ok(Resolution::Missing);
        };
        if record.job.status != JobStatus::Leased || !lease.matches(record.job.attempt) {
            return Ok(Resolution::Missing);
        }
        if record.job.attempts_exhausted() {
            return Ok(state.dead_letter(id, reason, now, self.config.dead_letter_retention));
        }

        record.job.status = JobStatus::Pending;
        record.job.last_error = Some(reason.to_string());
        record.lease_deadline = None;

        state.seq += 1;
        let seq = state.seq;
        state.delayed.push(Delayed {
            due: now + delay,
            seq,
            id,
        });

        Ok(Resolution::Rescheduled)
    }

    async fn fail(&self, lease: LeaseRef, reason: &str) -> Result<Resolution, StoreError> {
        self.check()?;
        let now = Instant::now();
        let mut state = self.state();

        match state.records.get(&lease.id) {
            Some(record) if !record.job.status.is_terminal() && lease.matches(record.job.attempt) => {
                Ok(state.dead_letter(lease.id, reason, now, self.config.dead_letter_retention))
            }
            _ => Ok(Resolution::Missing),
        }
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.check()?;
        let mut state = self.state();
        state.purge(Instant::now());
        Ok(state.records.get(&id).map(|r| r.job.clone()))
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        self.check()?;
        let mut state = self.state();
        state.purge(Instant::now());

        let count = |status: JobStatus| {
            state
                .records
                .values()
                .filter(|r| r.job.status == status)
                .count() as u64
        };
        let delayed = state
            .delayed
            .iter()
            .filter(|d| state.status_of(&d.id) == Some(JobStatus::Pending))
            .count() as u64;

        Ok(QueueStats {
            pending: count(JobStatus::Pending).saturating_sub(delayed),
            leased: count(JobStatus::Leased),
            delayed,
            dead_lettered: state.dead.len() as u64,
        })
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError> {
        self.check()?;
        let mut state = self.state();
        state.purge(Instant::now());
        Ok(state
            .dead
            .iter()
            .rev()
            .take(limit)
            .map(|entry| entry.letter.clone())
            .collect())
    }
}
