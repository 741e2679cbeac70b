//! Queue error types and handler error categorization
//!
//! Handler errors are categorized to determine how a job is resolved:
//! - **Transient**: temporary failure, retry with linear backoff
//! - **Permanent**: unrecoverable, dead-letter immediately

use thiserror::Error;

/// Category of a handler failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure (notifier unreachable, timeout, panic)
    Transient,
    /// Unrecoverable failure (malformed payload, rejected input)
    Permanent,
}

impl ErrorCategory {
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
        }
    }
}

/// Failure reported by a job handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        HandlerError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        HandlerError::Permanent(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            HandlerError::Transient(_) => ErrorCategory::Transient,
            HandlerError::Permanent(_) => ErrorCategory::Permanent,
        }
    }

    /// The bare reason, without the category prefix.
    pub fn reason(&self) -> &str {
        match self {
            HandlerError::Transient(msg) | HandlerError::Permanent(msg) => msg,
        }
    }
}

/// Errors raised by a queue store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store cannot be reached (refused, dropped, timed out)
    #[error("connection error: {0}")]
    Connection(String),

    /// The store answered but the command failed
    #[error("command error: {0}")]
    Command(String),

    /// A stored record could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The queue already holds its maximum of unresolved jobs
    #[error("queue full: {backlog} unresolved jobs (limit {limit})")]
    Full { backlog: u64, limit: u64 },
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout()
            || err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Errors surfaced by the queue, broker connection and worker pool.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The broker is disconnected or did not answer within the operation timeout
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The broker answered with an error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Payload could not be serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Handler registration problem
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl QueueError {
    pub fn is_broker_unavailable(&self) -> bool {
        matches!(self, QueueError::BrokerUnavailable(_))
    }

    pub fn is_full(&self) -> bool {
        matches!(self, QueueError::Store(StoreError::Full { .. }))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// Problems detected while building a handler registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("job kind must not be empty")]
    EmptyKind,

    #[error("a handler is already registered for kind '{0}'")]
    Duplicate(String),
}
