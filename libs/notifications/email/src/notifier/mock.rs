//! Mock notifier for tests and local runs

use super::{EmailMessage, Notifier, SendReceipt};
use crate::error::NotifierError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Default)]
struct MockState {
    sent: Vec<EmailMessage>,
    attempts: usize,
    /// Failures returned, in order, before sends start succeeding
    scripted: VecDeque<NotifierError>,
    /// Returned for every send once the script is exhausted
    always: Option<NotifierError>,
}

/// Captures sent messages instead of delivering them.
///
/// Clones share the same capture, so a test can keep one handle and pass
/// another to the handler.
#[derive(Clone, Default)]
pub struct MockNotifier {
    state: Arc<Mutex<MockState>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every send fails with `error`.
    pub fn failing(error: NotifierError) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                always: Some(error),
                ..MockState::default()
            })),
        }
    }

    /// Fail the next sends with `errors`, in order, then succeed.
    pub async fn fail_next(&self, errors: impl IntoIterator<Item = NotifierError>) {
        self.state.lock().await.scripted.extend(errors);
    }

    /// Messages delivered so far.
    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.state.lock().await.sent.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.state.lock().await.sent.len()
    }

    /// Send calls so far, failed ones included.
    pub async fn attempts(&self) -> usize {
        self.state.lock().await.attempts
    }

    pub async fn was_sent_to(&self, address: &str) -> bool {
        self.state
            .lock()
            .await
            .sent
            .iter()
            .any(|message| message.to == address)
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, NotifierError> {
        let mut state = self.state.lock().await;
        state.attempts += 1;

        if let Some(error) = state.scripted.pop_front() {
            return Err(error);
        }
        if let Some(error) = &state.always {
            return Err(error.clone());
        }

        state.sent.push(message.clone());
        let message_id = format!("mock-{}", state.sent.len());
        info!(to = %message.to, subject = %message.subject, %message_id, "Mock email captured");

        Ok(SendReceipt { message_id })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(to: &str) -> EmailMessage {
        EmailMessage {
            from: "onboarding@resend.dev".into(),
            to: to.into(),
            subject: "New Issue: Test".into(),
            html: "<p>body</p>".into(),
        }
    }

    #[tokio::test]
    async fn test_mock_captures_messages() {
        let notifier = MockNotifier::new();
        let handle = notifier.clone();

        let receipt = notifier.send(&message("admin@example.com")).await.unwrap();
        assert_eq!(receipt.message_id, "mock-1");

        assert_eq!(handle.sent_count().await, 1);
        assert!(handle.was_sent_to("admin@example.com").await);
        assert!(!handle.was_sent_to("other@example.com").await);
    }

    #[tokio::test]
    async fn test_mock_scripted_failures_then_success() {
        let notifier = MockNotifier::new();
        notifier
            .fail_next([
                NotifierError::transport("down"),
                NotifierError::RateLimited("busy".into()),
            ])
            .await;

        assert!(notifier.send(&message("a@example.com")).await.is_err());
        assert!(notifier.send(&message("a@example.com")).await.is_err());
        assert!(notifier.send(&message("a@example.com")).await.is_ok());
        assert_eq!(notifier.attempts().await, 3);
        assert_eq!(notifier.sent_count().await, 1);
    }

    #[tokio::test]
    async fn test_mock_failing() {
        let notifier = MockNotifier::failing(NotifierError::transport("Simulated failure"));

        for _ in 0..2 {
            let err = notifier.send(&message("a@example.com")).await.unwrap_err();
            assert!(err.to_string().contains("Simulated failure"));
        }
        assert_eq!(notifier.sent_count().await, 0);
    }
}
