//! Producer facade for the request path.
//!
//! The issue API calls [`AdminNotifications::issue_created`] after the issue
//! is stored. A broker outage must not fail that request, so it degrades to a
//! logged soft failure.

use crate::error::NotificationResult;
use crate::payload::NotifyAdmin;
use job_queue::{JobId, Queue};
use tracing::{info, warn};
use validator::Validate;

/// Outcome of a fire-and-forget notification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Persisted; the worker will deliver it
    Accepted(JobId),
    /// Broker unavailable; the notification was dropped
    Skipped,
}

impl Enqueued {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Enqueued::Accepted(id) => Some(*id),
            Enqueued::Skipped => None,
        }
    }
}

#[derive(Clone)]
pub struct AdminNotifications {
    queue: Queue,
}

impl AdminNotifications {
    pub fn new(queue: Queue) -> Self {
        Self { queue }
    }

    /// Enqueue a `notify-admin` job for a newly created issue.
    ///
    /// Returns [`Enqueued::Skipped`] when the broker is unavailable. Invalid
    /// payloads and other queue errors are returned to the caller.
    pub async fn issue_created(&self, payload: &NotifyAdmin) -> NotificationResult<Enqueued> {
        payload.validate()?;

        match self.queue.enqueue_payload(payload).await {
            Ok(job_id) => {
                info!(%job_id, issue_id = %payload.issue_id, "Admin notification queued");
                Ok(Enqueued::Accepted(job_id))
            }
            Err(e) if e.is_broker_unavailable() => {
                warn!(
                    issue_id = %payload.issue_id,
                    error = %e,
                    "Admin notification skipped, broker unavailable"
                );
                Ok(Enqueued::Skipped)
            }
            Err(e) => Err(e.into()),
        }
    }
}
