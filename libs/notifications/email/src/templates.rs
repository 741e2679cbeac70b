//! Email templates with Handlebars
//!
//! Subjects use triple-stash (`{{{title}}}`) since they are plain text.
//! HTML bodies use `{{...}}`, which HTML-escapes every value.

use crate::error::NotificationResult;
use handlebars::Handlebars;
use serde::Serialize;
use std::collections::HashSet;

/// Template name of the new-issue admin notification
pub const NOTIFY_ADMIN: &str = "notify_admin";

const NOTIFY_ADMIN_SUBJECT: &str = "New Issue: {{{title}}}";
const NOTIFY_ADMIN_HTML: &str = "<p>New issue reported by \
{{#if requester_identity}}{{requester_identity}}{{else}}an unknown requester{{/if}}: \
<strong>{{title}}</strong></p>";

/// A subject plus HTML body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

/// Email template definition
#[derive(Debug, Clone)]
pub struct EmailTemplate {
    pub name: String,
    pub subject: String,
    pub html: String,
}

/// Handlebars engine in strict mode: a missing variable is an error, not
/// an empty string.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
    names: HashSet<String>,
}

impl TemplateEngine {
    /// Engine with the built-in templates registered.
    pub fn new() -> NotificationResult<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);

        let mut engine = Self {
            handlebars,
            names: HashSet::new(),
        };
        engine.register(EmailTemplate {
            name: NOTIFY_ADMIN.to_string(),
            subject: NOTIFY_ADMIN_SUBJECT.to_string(),
            html: NOTIFY_ADMIN_HTML.to_string(),
        })?;
        Ok(engine)
    }

    /// Register or replace a template.
    pub fn register(&mut self, template: EmailTemplate) -> NotificationResult<()> {
        self.handlebars
            .register_template_string(&subject_key(&template.name), &template.subject)?;
        self.handlebars
            .register_template_string(&html_key(&template.name), &template.html)?;
        self.names.insert(template.name);
        Ok(())
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> NotificationResult<RenderedEmail> {
        let subject = self.handlebars.render(&subject_key(name), data)?;
        let html = self.handlebars.render(&html_key(name), data)?;

        Ok(RenderedEmail {
            subject: single_line(&subject),
            html,
        })
    }
}

fn subject_key(name: &str) -> String {
    format!("{name}_subject")
}

fn html_key(name: &str) -> String {
    format!("{name}_html")
}

/// Header values must not span lines.
fn single_line(subject: &str) -> String {
    subject
        .split(['\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
