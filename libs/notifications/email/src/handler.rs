//! Worker-side handler for `notify-admin` jobs.

use crate::config::EmailConfig;
use crate::notifier::{EmailMessage, Notifier};
use crate::payload::NotifyAdmin;
use crate::templates::{TemplateEngine, NOTIFY_ADMIN};
use async_trait::async_trait;
use job_queue::{HandlerError, Job, PayloadHandler};
use std::sync::Arc;
use tracing::info;

/// Renders the new-issue email and sends it to the admin.
///
/// Template failures are permanent. Notifier failures keep the notifier's
/// classification.
pub struct AdminEmailHandler {
    notifier: Arc<dyn Notifier>,
    templates: Arc<TemplateEngine>,
    admin_email: String,
    from_address: String,
}

impl AdminEmailHandler {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        templates: Arc<TemplateEngine>,
        admin_email: impl Into<String>,
        from_address: impl Into<String>,
    ) -> Self {
        Self {
            notifier,
            templates,
            admin_email: admin_email.into(),
            from_address: from_address.into(),
        }
    }

    pub fn from_config(
        notifier: Arc<dyn Notifier>,
        templates: Arc<TemplateEngine>,
        config: &EmailConfig,
    ) -> Self {
        Self::new(
            notifier,
            templates,
            config.admin_email.clone(),
            config.from_address.clone(),
        )
    }

    fn message(&self, payload: &NotifyAdmin) -> Result<EmailMessage, HandlerError> {
        let rendered = self
            .templates
            .render(NOTIFY_ADMIN, payload)
            .map_err(|e| HandlerError::permanent(e.to_string()))?;

        Ok(EmailMessage {
            from: self.from_address.clone(),
            to: self.admin_email.clone(),
            subject: rendered.subject,
            html: rendered.html,
        })
    }
}

#[async_trait]
impl PayloadHandler for AdminEmailHandler {
    type Payload = NotifyAdmin;

    async fn handle(&self, payload: NotifyAdmin, job: &Job) -> Result<(), HandlerError> {
        let message = self.message(&payload)?;
        let receipt = self.notifier.send(&message).await?;

        info!(
            job_id = %job.id,
            issue_id = %payload.issue_id,
            provider = self.notifier.name(),
            message_id = %receipt.message_id,
            "Admin notified of new issue"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "admin-email"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotifierError;
    use crate::notifier::MockNotifier;
    use job_queue::{ErrorCategory, HandlerRegistry, JobHandler, JobPayload};
    use serde_json::json;

    fn handler(notifier: &MockNotifier) -> AdminEmailHandler {
        AdminEmailHandler::new(
            Arc::new(notifier.clone()),
            Arc::new(TemplateEngine::new().unwrap()),
            "admin@example.com",
            "onboarding@resend.dev",
        )
    }

    fn job(payload: serde_json::Value) -> Job {
        Job::new(NotifyAdmin::KIND, payload, 5)
    }

    fn payload() -> NotifyAdmin {
        NotifyAdmin::new("ISSUE-42", "Printer on fire", "jane@example.com")
    }

    #[tokio::test]
    async fn test_sends_rendered_email_to_admin() {
        let notifier = MockNotifier::new();
        let payload = payload();
        let job = job(serde_json::to_value(&payload).unwrap());

        handler(&notifier).handle(payload, &job).await.unwrap();

        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "admin@example.com");
        assert_eq!(sent[0].from, "onboarding@resend.dev");
        assert_eq!(sent[0].subject, "New Issue: Printer on fire");
        assert!(sent[0].html.contains("jane@example.com"));
    }

    #[tokio::test]
    async fn test_notifier_failures_keep_their_category() {
        let notifier = MockNotifier::new();
        notifier
            .fail_next([
                NotifierError::transport("connection reset"),
                NotifierError::Rejected {
                    status: 422,
                    body: "invalid from".into(),
                },
            ])
            .await;
        let handler = handler(&notifier);
        let payload = payload();
        let job = job(serde_json::to_value(&payload).unwrap());

        let first = handler.handle(payload.clone(), &job).await.unwrap_err();
        assert_eq!(first.category(), ErrorCategory::Transient);

        let second = handler.handle(payload, &job).await.unwrap_err();
        assert_eq!(second.category(), ErrorCategory::Permanent);
        assert_eq!(notifier.sent_count().await, 0);
    }

    #[tokio::test]
    async fn test_registered_under_notify_admin_kind() {
        let notifier = MockNotifier::new();
        let registry = HandlerRegistry::builder()
            .register_payload(handler(&notifier))
            .unwrap()
            .build();

        assert_eq!(registry.kinds(), vec!["notify-admin"]);
        let registered = registry.get("notify-admin").unwrap();
        assert_eq!(registered.name(), "admin-email");

        let bad = job(json!({ "issue_id": "ISSUE-42", "title": "", "requester_identity": "x" }));
        let err = registered.handle(&bad).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Permanent);

        let malformed = job(json!({ "title": "no id" }));
        let err = registered.handle(&malformed).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert_eq!(notifier.attempts().await, 0);
    }
}
