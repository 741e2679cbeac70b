//! Notifier implementations
//!
//! - `resend`: Resend HTTP API
//! - `smtp`: any SMTP relay via lettre (Mailpit locally)
//! - `mock`: in-memory capture for tests and local runs

pub mod mock;
pub mod resend;
pub mod smtp;

pub use mock::MockNotifier;
pub use resend::ResendNotifier;
pub use smtp::{SmtpConfig, SmtpNotifier};

use crate::config::{EmailConfig, NotifierProvider};
use crate::error::{NotificationError, NotifierError};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// A rendered message ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Provider acknowledgement of a sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Provider-specific message id
    pub message_id: String,
}

/// Capability to deliver a message. Failures are classified by
/// [`NotifierError::is_permanent`].
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, NotifierError>;

    fn name(&self) -> &'static str;
}

/// Build the notifier selected by `NOTIFIER_PROVIDER`.
pub fn build_notifier(config: &EmailConfig) -> Result<Arc<dyn Notifier>, NotificationError> {
    let notifier: Arc<dyn Notifier> = match config.provider {
        NotifierProvider::Resend => {
            let api_key = config.resend_api_key.clone().ok_or_else(|| {
                NotificationError::Config("RESEND_API_KEY is required for the resend provider".into())
            })?;
            Arc::new(ResendNotifier::new(api_key)?)
        }
        NotifierProvider::Smtp => {
            let smtp = config.smtp.clone().ok_or_else(|| {
                NotificationError::Config("SMTP_HOST is required for the smtp provider".into())
            })?;
            Arc::new(SmtpNotifier::new(smtp)?)
        }
        NotifierProvider::Mock => Arc::new(MockNotifier::new()),
    };

    info!(provider = notifier.name(), "Notifier configured");
    Ok(notifier)
}
