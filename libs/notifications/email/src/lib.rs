//! Admin email notifications for new issues
//!
//! Producer side: [`AdminNotifications`] enqueues a `notify-admin` job on the
//! shared [`job_queue::Queue`] and degrades broker outages to a warning.
//!
//! Worker side: [`AdminEmailHandler`] renders the [`NotifyAdmin`] payload with
//! Handlebars and sends it through a [`Notifier`].
//!
//! ## Notifiers
//!
//! - **Resend** (default): HTTP API, `RESEND_API_KEY`
//! - **SMTP**: lettre, `SMTP_*`
//! - **Mock**: captures messages in memory
//!
//! ## Usage
//!
//! ```ignore
//! use email::{build_notifier, AdminEmailHandler, EmailConfig, TemplateEngine};
//!
//! let config = EmailConfig::from_env()?;
//! let notifier = build_notifier(&config)?;
//! let templates = Arc::new(TemplateEngine::new()?);
//!
//! let registry = HandlerRegistry::builder()
//!     .register_payload(AdminEmailHandler::from_config(notifier, templates, &config))?
//!     .build();
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod notifier;
pub mod payload;
pub mod producer;
pub mod templates;

pub use config::{EmailConfig, NotifierProvider};
pub use error::{NotificationError, NotificationResult, NotifierError};
pub use handler::AdminEmailHandler;
pub use notifier::{
    build_notifier, EmailMessage, MockNotifier, Notifier, ResendNotifier, SendReceipt,
    SmtpConfig, SmtpNotifier,
};
pub use payload::NotifyAdmin;
pub use producer::{AdminNotifications, Enqueued};
pub use templates::{EmailTemplate, RenderedEmail, TemplateEngine};
