//! Job handlers and the kind -> handler registry.
//!
//! This module provides:
//! - `JobHandler` trait for handlers working on raw jobs
//! - `PayloadHandler` trait for handlers declaring a typed payload
//! - `HandlerRegistry`, built once at startup and immutable afterwards

use crate::error::{HandlerError, RegistryError};
use crate::job::{Job, JobPayload};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use validator::Validate;

/// Trait for job handlers.
///
/// Return `Ok(())` for success. The error category decides whether the job
/// is retried (`Transient`) or dead-lettered (`Permanent`).
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError>;

    /// Handler name for logging.
    fn name(&self) -> &'static str;
}

/// Trait for handlers that work on a typed, validated payload.
///
/// # Example
///
/// ```rust,ignore
/// struct AdminEmailHandler { notifier: Arc<dyn Notifier> }
///
/// #[async_trait]
/// impl PayloadHandler for AdminEmailHandler {
///     type Payload = NotifyAdmin;
///
///     async fn handle(&self, payload: NotifyAdmin, job: &Job) -> Result<(), HandlerError> {
///         self.notifier.send(&render(&payload)?).await.map_err(classify)?;
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str {
///         "AdminEmailHandler"
///     }
/// }
/// ```
#[async_trait]
pub trait PayloadHandler: Send + Sync + 'static {
    type Payload: JobPayload + Validate;

    async fn handle(&self, payload: Self::Payload, job: &Job) -> Result<(), HandlerError>;

    fn name(&self) -> &'static str;
}

/// Adapts a [`PayloadHandler`] to a [`JobHandler`].
///
/// A payload that does not deserialize or validate is a permanent failure;
/// retrying cannot fix it.
pub struct Typed<H>(pub H);

#[async_trait]
impl<H: PayloadHandler> JobHandler for Typed<H> {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        let payload: H::Payload = job
            .payload_as()
            .map_err(|e| HandlerError::permanent(format!("malformed payload: {e}")))?;
        payload
            .validate()
            .map_err(|e| HandlerError::permanent(format!("invalid payload: {e}")))?;

        self.0.handle(payload, job).await
    }

    fn name(&self) -> &'static str {
        self.0.name()
    }
}

/// Immutable map from job kind to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Collects registrations, rejecting empty and duplicate kinds.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistryBuilder {
    pub fn register<H: JobHandler>(
        self,
        kind: impl Into<String>,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.register_arc(kind, Arc::new(handler))
    }

    pub fn register_arc(
        mut self,
        kind: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> Result<Self, RegistryError> {
        let kind = kind.into();
        if kind.trim().is_empty() {
            return Err(RegistryError::EmptyKind);
        }
        if self.handlers.contains_key(&kind) {
            return Err(RegistryError::Duplicate(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(self)
    }

    /// Register a typed handler under its payload's kind.
    pub fn register_payload<H: PayloadHandler>(self, handler: H) -> Result<Self, RegistryError> {
        self.register(<H::Payload as JobPayload>::KIND, Typed(handler))
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: Arc::new(self.handlers),
        }
    }
}
