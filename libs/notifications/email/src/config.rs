//! Email notification configuration.

use crate::notifier::SmtpConfig;
use core_config::{env_or_default, env_parse, env_required, ConfigError, FromEnv};
use strum::{Display, EnumString};
use validator::ValidateEmail;

/// Default sender, Resend's shared onboarding address
pub const DEFAULT_FROM_ADDRESS: &str = "onboarding@resend.dev";

/// Which transport delivers notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum NotifierProvider {
    #[default]
    Resend,
    Smtp,
    Mock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailConfig {
    pub provider: NotifierProvider,
    /// Recipient of new-issue notifications
    pub admin_email: String,
    pub from_address: String,
    pub resend_api_key: Option<String>,
    pub smtp: Option<SmtpConfig>,
}

impl EmailConfig {
    pub fn new(admin_email: impl Into<String>) -> Self {
        Self {
            provider: NotifierProvider::default(),
            admin_email: admin_email.into(),
            from_address: DEFAULT_FROM_ADDRESS.to_string(),
            resend_api_key: None,
            smtp: None,
        }
    }

    pub fn with_provider(mut self, provider: NotifierProvider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_from_address(mut self, from_address: impl Into<String>) -> Self {
        self.from_address = from_address.into();
        self
    }

    pub fn with_resend_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.resend_api_key = Some(api_key.into());
        self
    }

    pub fn with_smtp(mut self, smtp: SmtpConfig) -> Self {
        self.smtp = Some(smtp);
        self
    }

    /// Both addresses must be valid mailboxes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.admin_email.validate_email() {
            return Err(ConfigError::invalid("ADMIN_EMAIL", "not a valid email address"));
        }
        if !self.from_address.validate_email() {
            return Err(ConfigError::invalid(
                "EMAIL_FROM_ADDRESS",
                "not a valid email address",
            ));
        }
        Ok(())
    }
}

impl FromEnv for EmailConfig {
    /// Reads:
    /// - `NOTIFIER_PROVIDER`: resend (default), smtp or mock
    /// - `ADMIN_EMAIL`: required
    /// - `EMAIL_FROM_ADDRESS`: defaults to onboarding@resend.dev
    /// - `RESEND_API_KEY`: required when the provider is resend
    /// - `SMTP_*`: read when the provider is smtp
    fn from_env() -> Result<Self, ConfigError> {
        let provider = env_parse("NOTIFIER_PROVIDER", NotifierProvider::default())?;

        let resend_api_key = match provider {
            NotifierProvider::Resend => Some(env_required("RESEND_API_KEY")?),
            _ => std::env::var("RESEND_API_KEY").ok().filter(|v| !v.is_empty()),
        };
        let smtp = match provider {
            NotifierProvider::Smtp => Some(SmtpConfig::from_env()?),
            _ => None,
        };

        let config = Self {
            provider,
            admin_email: env_required("ADMIN_EMAIL")?,
            from_address: env_or_default("EMAIL_FROM_ADDRESS", DEFAULT_FROM_ADDRESS),
            resend_api_key,
            smtp,
        };
        config.validate()?;
        Ok(config)
    }
}
