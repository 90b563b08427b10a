//! # Mailer
//!
//! Outgoing email over SMTP, configured from the environment.
//!
//! Without `SMTP_HOST` every message goes to [`LogTransport`], which logs and reports success so
//! local development never blocks on a mail server.
use async_trait::async_trait;
use contact::{FeedbackForm, Submission};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::header::ContentType, transport::smtp::authentication::Credentials,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::SmtpConfig;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("Invalid address {0}")]
    Address(String),

    #[error("Failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("SMTP: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingEmail {
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpTransport {
    pub fn new(config: &SmtpConfig, from: &str) -> Result<Self, MailError> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let mut message = Message::builder()
            .from(parse_mailbox(&self.from)?)
            .to(parse_mailbox(&email.to)?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN);

        if let Some(reply_to) = &email.reply_to {
            message = message.reply_to(parse_mailbox(reply_to)?);
        }

        let message = message.body(email.body.clone())?;
        self.transport.send(message).await?;

        info!("Sent email \"{}\" to {}", email.subject, email.to);

        Ok(())
    }
}

pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            "SMTP not configured, email not delivered"
        );

        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<lettre::message::Mailbox, MailError> {
    address
        .parse()
        .map_err(|_| MailError::Address(address.to_string()))
}

/// Notification for the site owner. Replies go straight to the submitter.
pub fn owner_notification(submission: &Submission, owner: &str) -> OutgoingEmail {
    OutgoingEmail {
        to: owner.to_string(),
        reply_to: Some(submission.email.clone()),
        subject: format!("New contact submission: {}", submission.subject),
        body: format!(
            "Name: {}\nEmail: {}\nSubject: {}\nReceived: {}\nID: {}\n\n{}\n",
            submission.name,
            submission.email,
            submission.subject,
            submission.created_at.to_rfc3339(),
            submission.id,
            submission.message,
        ),
    }
}

pub fn submitter_confirmation(submission: &Submission) -> OutgoingEmail {
    OutgoingEmail {
        to: submission.email.clone(),
        reply_to: None,
        subject: format!("Thanks for reaching out: {}", submission.subject),
        body: format!(
            "Hi {},\n\nThanks for your message. I read everything that comes in and will get back \
             to you soon.\n\nFor reference, you wrote:\n\n{}\n",
            submission.name, submission.message,
        ),
    }
}

pub fn feedback_notification(feedback: &FeedbackForm, owner: &str) -> OutgoingEmail {
    OutgoingEmail {
        to: owner.to_string(),
        reply_to: None,
        subject: format!("New site feedback: {}/5", feedback.rating),
        body: format!(
            "Rating: {}/5\nPage: {}\n\n{}\n",
            feedback.rating,
            feedback.page.as_deref().unwrap_or("-"),
            feedback.message.as_deref().unwrap_or("(no message)"),
        ),
    }
}
