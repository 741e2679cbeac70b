//! Job model
//!
//! A job is a kind-tagged JSON payload plus the bookkeeping the broker
//! needs to lease, retry and dead-letter it.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Unique job identifier (UUID v7, time ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be leased (possibly behind a retry delay)
    Pending,
    /// Claimed by a worker
    Leased,
    /// Handled successfully
    Completed,
    /// Attempt failed, resolution pending
    Failed,
    /// Terminal failure, retained for inspection
    DeadLettered,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::DeadLettered)
    }
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: String,
    pub payload: serde_json::Value,
    /// Number of leases so far (0 until first leased)
    pub attempt: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    pub leased_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value, max_attempts: u32) -> Self {
        Self {
            id: JobId::new(),
            kind: kind.into(),
            payload,
            attempt: 0,
            max_attempts,
            status: JobStatus::Pending,
            enqueued_at: Utc::now(),
            leased_at: None,
            last_error: None,
        }
    }

    /// Whether the attempt budget is spent.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Deserialize the payload into a typed value.
    pub fn payload_as<P: DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Time since the job was enqueued.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.enqueued_at
    }
}

/// Typed job payloads carry their kind with them.
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// struct NotifyAdmin { issue_id: String, title: String }
///
/// impl JobPayload for NotifyAdmin {
///     const KIND: &'static str = "notify-admin";
/// }
///
/// let id = queue.enqueue_payload(&NotifyAdmin { .. }).await?;
/// ```
pub trait JobPayload: Serialize + DeserializeOwned + Send + Sync {
    const KIND: &'static str;
}

/// A dead-lettered job as retained for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job_id: JobId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub reason: String,
    pub enqueued_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn from_job(job: &Job, reason: impl Into<String>) -> Self {
        Self {
            job_id: job.id,
            kind: job.kind.clone(),
            payload: job.payload.clone(),
            attempt: job.attempt,
            reason: reason.into(),
            enqueued_at: job.enqueued_at,
            failed_at: Utc::now(),
        }
    }
}

/// The job an `ack`/`retry`/`fail` applies to.
///
/// Built from a bare [`JobId`] it targets whatever lease is current. Built
/// from a leased [`Job`] it is pinned to that delivery: once the lease has
/// expired and the job was handed to another consumer, the request no
/// longer matches and is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseRef {
    pub id: JobId,
    pub attempt: Option<u32>,
}

impl LeaseRef {
    /// Whether a stored job with this attempt count is the one referenced.
    pub fn matches(&self, attempt: u32) -> bool {
        self.attempt.is_none_or(|expected| expected == attempt)
    }
}

impl From<JobId> for LeaseRef {
    fn from(id: JobId) -> Self {
        Self { id, attempt: None }
    }
}

impl From<&Job> for LeaseRef {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            attempt: Some(job.attempt),
        }
    }
}

/// How a retry/fail request was resolved by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Back to pending once the delay elapses
    Rescheduled,
    /// Terminal, with the recorded reason
    DeadLettered(String),
    /// No such job, already resolved, or leased to someone else since
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_ids_are_unique_and_parse() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);

        let parsed: JobId = a.to_string().parse().unwrap();
        assert_eq!(parsed, a);
    }

    #[test]
    fn test_new_job_defaults() {
        let job = Job::new("notify-admin", json!({"issue_id": "I1"}), 5);

        assert_eq!(job.attempt, 0);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.leased_at.is_none());
        assert!(!job.attempts_exhausted());
        assert!(job.age().num_seconds() < 5);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(JobStatus::DeadLettered.to_string(), "dead_lettered");
        assert_eq!("leased".parse::<JobStatus>().unwrap(), JobStatus::Leased);
        assert!(JobStatus::Completed.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_payload_as() {
        #[derive(Deserialize)]
        struct Payload {
            issue_id: String,
        }

        let job = Job::new("notify-admin", json!({"issue_id": "I1"}), 5);
        let payload: Payload = job.payload_as().unwrap();
        assert_eq!(payload.issue_id, "I1");
    }

    #[test]
    fn test_lease_ref_pinning() {
        let mut job = Job::new("notify-admin", json!({}), 5);
        job.attempt = 2;

        let any = LeaseRef::from(job.id);
        assert!(any.matches(2));
        assert!(any.matches(3));

        let pinned = LeaseRef::from(&job);
        assert_eq!(pinned.id, job.id);
        assert!(pinned.matches(2));
        assert!(!pinned.matches(3));
    }
}
