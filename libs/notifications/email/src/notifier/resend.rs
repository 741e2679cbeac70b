//! Resend notifier
//!
//! Sends email through the Resend HTTP API (`POST /emails`).

use super::{EmailMessage, Notifier, SendReceipt};
use crate::error::{NotificationError, NotifierError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Resend API base URL
const RESEND_API_URL: &str = "https://api.resend.com";

/// Per-request timeout; the worker's execution timeout bounds the whole send
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ResendNotifier {
    api_key: String,
    base_url: String,
    client: Client,
}

impl ResendNotifier {
    pub fn new(api_key: impl Into<String>) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotificationError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key: api_key.into(),
            base_url: RESEND_API_URL.to_string(),
            client,
        })
    }

    /// Point the notifier at another endpoint (a local stub in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: String,
}

/// Map a non-success status to a notifier error.
///
/// 400 and 422 mean Resend validated the message and refused it; anything
/// else (auth, rate limit, server side) may clear up on its own.
fn classify(status: StatusCode, body: String) -> NotifierError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => NotifierError::Rejected {
            status: status.as_u16(),
            body,
        },
        StatusCode::TOO_MANY_REQUESTS => NotifierError::RateLimited(body),
        _ => NotifierError::Transport(format!("Resend returned {status}: {body}")),
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, NotifierError> {
        let request = ResendRequest {
            from: &message.from,
            to: [&message.to],
            subject: &message.subject,
            html: &message.html,
        };

        debug!(to = %message.to, subject = %message.subject, "Sending email via Resend");

        let response = self
            .client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| NotifierError::transport(format!("Resend request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, error = %body, "Resend API error");
            return Err(classify(status, body));
        }

        let sent: ResendResponse = response
            .json()
            .await
            .map_err(|e| NotifierError::transport(format!("unreadable Resend response: {e}")))?;

        debug!(message_id = %sent.id, "Email accepted by Resend");
        Ok(SendReceipt {
            message_id: sent.id,
        })
    }

    fn name(&self) -> &'static str {
        "resend"
    }
}
