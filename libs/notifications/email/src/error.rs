//! Error types for notifiers and the notification facade.

use job_queue::{HandlerError, QueueError};
use thiserror::Error;

/// Failure reported by a [`Notifier`](crate::Notifier).
///
/// Only [`NotifierError::Rejected`] and [`NotifierError::InvalidAddress`] are
/// permanent: the provider refused the message itself, so resending the same
/// message cannot succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifierError {
    /// Provider unreachable, timed out or failed on its side
    #[error("transport error: {0}")]
    Transport(String),

    /// Provider rate limited the request
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Provider rejected the message as malformed
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Sender or recipient is not a valid mailbox
    #[error("invalid address '{address}': {details}")]
    InvalidAddress { address: String, details: String },
}

impl NotifierError {
    pub fn transport(message: impl Into<String>) -> Self {
        NotifierError::Transport(message.into())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            NotifierError::Rejected { .. } | NotifierError::InvalidAddress { .. }
        )
    }
}

impl From<NotifierError> for HandlerError {
    fn from(err: NotifierError) -> Self {
        if err.is_permanent() {
            HandlerError::permanent(err.to_string())
        } else {
            HandlerError::transient(err.to_string())
        }
    }
}

/// Errors raised while configuring or producing notifications.
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] validator::ValidationErrors),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<core_config::ConfigError> for NotificationError {
    fn from(err: core_config::ConfigError) -> Self {
        NotificationError::Config(err.to_string())
    }
}

impl From<handlebars::RenderError> for NotificationError {
    fn from(err: handlebars::RenderError) -> Self {
        NotificationError::Template(err.to_string())
    }
}

impl From<handlebars::TemplateError> for NotificationError {
    fn from(err: handlebars::TemplateError) -> Self {
        NotificationError::Template(err.to_string())
    }
}

pub type NotificationResult<T> = Result<T, NotificationError>;
