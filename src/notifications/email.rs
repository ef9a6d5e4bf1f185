use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use super::{EmailMessage, EmailSender, NotificationError};
use crate::config::EmailConfig;

/// SMTP delivery over STARTTLS.
#[derive(Clone)]
pub struct SmtpEmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn new(config: &EmailConfig) -> Result<Self, NotificationError> {
        let credentials =
            Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            mailer,
            from: parse_mailbox(&config.from_address)?,
        })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotificationError> {
    address
        .parse()
        .map_err(|_| NotificationError::InvalidAddress(address.to_string()))
}

/// Builds the lettre message for an outbound email.
pub(crate) fn build_message(from: Mailbox, message: &EmailMessage) -> Result<Message, NotificationError> {
    Ok(Message::builder()
        .from(from)
        .to(parse_mailbox(&message.to)?)
        .subject(message.subject.clone())
        .header(ContentType::TEXT_HTML)
        .body(message.html.clone())?)
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError> {
        let email = build_message(self.from.clone(), &message)?;
        self.mailer.send(email).await?;
        info!(to = %message.to, subject = %message.subject, "Email sent");
        Ok(())
    }
}

/// Used when no SMTP relay is configured: records the message and drops it.
#[derive(Debug, Clone, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            bytes = message.html.len(),
            "SMTP not configured, email not delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn message(to: &str) -> EmailMessage {
        EmailMessage {
            to: to.to_string(),
            subject: "Order Confirmation - MS Foods".into(),
            html: "<p>Thanks</p>".into(),
        }
    }

    #[test]
    fn builds_html_message() {
        let from = parse_mailbox("MS Foods <orders@msfoods.example>").unwrap();
        let built = build_message(from, &message("ayesha@example.com")).unwrap();
        let raw = String::from_utf8(built.formatted()).unwrap();
        assert!(raw.contains("Subject: Order Confirmation - MS Foods"));
        assert!(raw.contains("Content-Type: text/html"));
        assert!(raw.contains("To: ayesha@example.com"));
    }

    #[test]
    fn rejects_malformed_recipient() {
        let from = parse_mailbox("orders@msfoods.example").unwrap();
        assert_matches!(
            build_message(from, &message("not an address")),
            Err(NotificationError::InvalidAddress(addr)) if addr == "not an address"
        );
    }

    #[tokio::test]
    async fn log_sender_accepts_everything() {
        assert!(LogEmailSender.send(message("x@example.com")).await.is_ok());
    }
}
