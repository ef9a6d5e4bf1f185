//! Outbound customer notifications.
//!
//! Two sinks exist: email (SMTP via lettre) and WhatsApp template messages
//! (Cloud API via reqwest). [`OrderNotifier`] turns order events into
//! messages for those sinks. Delivery is fire-and-forget from the caller's
//! point of view; failures are logged by the event loop and never reach the
//! request that triggered them.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::errors::ServiceError;

pub mod email;
pub mod notifier;
pub mod templates;
pub mod whatsapp;

pub use email::{LogEmailSender, SmtpEmailSender};
pub use notifier::{NotifierSettings, OrderNotifier};
pub use whatsapp::WhatsAppCloudClient;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WhatsApp API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Order {0} not found")]
    OrderNotFound(uuid::Uuid),
}

impl From<NotificationError> for ServiceError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::Database(e) => ServiceError::DatabaseError(e),
            NotificationError::OrderNotFound(id) => {
                ServiceError::NotFound(format!("Order {} not found", id))
            }
            other => ServiceError::ExternalServiceError(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Named body parameter of a WhatsApp template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateParam {
    pub name: String,
    pub value: String,
}

impl TemplateParam {
    pub fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhatsAppMessage {
    pub to: String,
    pub template: String,
    pub params: Vec<TemplateParam>,
}

impl WhatsAppMessage {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WhatsAppSender: Send + Sync {
    async fn send(&self, message: WhatsAppMessage) -> Result<(), NotificationError>;
}
