//! `notify-admin` job payload.

use job_queue::JobPayload;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// A new issue the admin should hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct NotifyAdmin {
    /// Opaque id assigned by the issue store
    #[validate(length(min = 1, max = 128, message = "issue id must be 1-128 characters"))]
    pub issue_id: String,

    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub title: String,

    /// Who reported the issue, usually their email address. Empty when the
    /// producer did not know.
    #[serde(default)]
    #[validate(length(max = 320, message = "requester identity must be at most 320 characters"))]
    pub requester_identity: String,
}

impl NotifyAdmin {
    pub fn new(
        issue_id: impl Into<String>,
        title: impl Into<String>,
        requester_identity: impl Into<String>,
    ) -> Self {
        Self {
            issue_id: issue_id.into(),
            title: title.into(),
            requester_identity: requester_identity.into(),
        }
    }
}

impl JobPayload for NotifyAdmin {
    const KIND: &'static str = "notify-admin";
}
