//! SMTP notifier using lettre

use super::{EmailMessage, Notifier, SendReceipt};
use crate::error::{NotificationError, NotifierError};
use async_trait::async_trait;
use core_config::{env_flag, env_or_default, env_parse, ConfigError, FromEnv};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

/// SMTP transport configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
}

impl SmtpConfig {
    /// Unauthenticated, plaintext relay (Mailpit/Mailhog on port 1025).
    pub fn local(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 1025,
            username: String::new(),
            password: String::new(),
            use_tls: false,
        }
    }
}

impl FromEnv for SmtpConfig {
    /// `SMTP_HOST` is required; `SMTP_PORT` defaults to 587 and `SMTP_USE_TLS` to true.
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: core_config::env_required("SMTP_HOST")?,
            port: env_parse("SMTP_PORT", 587)?,
            username: env_or_default("SMTP_USERNAME", ""),
            password: env_or_default("SMTP_PASSWORD", ""),
            use_tls: env_flag("SMTP_USE_TLS", true),
        })
    }
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Result<Self, NotificationError> {
        let credentials = (!config.username.is_empty())
            .then(|| Credentials::new(config.username.clone(), config.password.clone()));

        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| NotificationError::Config(format!("invalid SMTP relay: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        builder = builder.port(config.port);
        if let Some(credentials) = credentials {
            builder = builder.credentials(credentials);
        }

        info!(host = %config.host, port = config.port, tls = config.use_tls, "SMTP transport configured");
        Ok(Self {
            transport: builder.build(),
        })
    }
}

fn mailbox(address: &str) -> Result<Mailbox, NotifierError> {
    address
        .parse()
        .map_err(|e: lettre::address::AddressError| NotifierError::InvalidAddress {
            address: address.to_string(),
            details: e.to_string(),
        })
}

/// Build the MIME message. Address problems are permanent.
pub(crate) fn build_message(message: &EmailMessage) -> Result<Message, NotifierError> {
    Message::builder()
        .from(mailbox(&message.from)?)
        .to(mailbox(&message.to)?)
        .subject(&message.subject)
        .header(ContentType::TEXT_HTML)
        .body(message.html.clone())
        .map_err(|e| NotifierError::Rejected {
            status: 0,
            body: format!("failed to build message: {e}"),
        })
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, NotifierError> {
        let mime = build_message(message)?;

        let response = self.transport.send(mime).await.map_err(|e| {
            if e.is_permanent() {
                NotifierError::Rejected {
                    status: e
                        .status()
                        .and_then(|code| code.to_string().parse().ok())
                        .unwrap_or(0),
                    body: e.to_string(),
                }
            } else {
                NotifierError::transport(format!("SMTP send failed: {e}"))
            }
        })?;

        let message_id = response
            .message()
            .next()
            .map(str::to_string)
            .unwrap_or_else(|| response.code().to_string());

        Ok(SendReceipt { message_id })
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}
