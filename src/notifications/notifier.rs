use std::sync::Arc;

use chrono::Utc;
use sea_orm::{DatabaseConnection, EntityTrait, ModelTrait};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    templates, EmailMessage, EmailSender, NotificationError, WhatsAppMessage, WhatsAppSender,
};
use crate::config::AppConfig;
use crate::entities::{
    order::{self, OrderStatus},
    order_item,
    user::{self, VerificationMethod},
};

#[derive(Debug, Clone)]
pub struct NotifierSettings {
    pub store_name: String,
    pub public_base_url: String,
    pub whatsapp_status_updates: bool,
}

impl From<&AppConfig> for NotifierSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            store_name: cfg.store_name.clone(),
            public_base_url: cfg.public_base_url.clone(),
            whatsapp_status_updates: cfg.notifications.whatsapp_status_updates,
        }
    }
}

/// Where to reach the customer behind an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub phone_verified: bool,
}

/// The owning account wins; guest orders fall back to the shipping address.
pub fn resolve_contact(order: &order::Model, user: Option<&user::Model>) -> Contact {
    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };
    match user {
        Some(user) => Contact {
            email: non_empty(&user.email),
            phone: user.phone.as_deref().and_then(non_empty),
            phone_verified: user.verification_method == Some(VerificationMethod::Phone),
        },
        None => Contact {
            email: non_empty(&order.shipping_address.email),
            phone: non_empty(&order.shipping_address.phone),
            phone_verified: false,
        },
    }
}

/// Turns order events into customer emails and WhatsApp messages.
#[derive(Clone)]
pub struct OrderNotifier {
    db: Arc<DatabaseConnection>,
    email: Arc<dyn EmailSender>,
    whatsapp: Option<Arc<dyn WhatsAppSender>>,
    settings: NotifierSettings,
}

impl OrderNotifier {
    pub fn new(
        db: Arc<DatabaseConnection>,
        email: Arc<dyn EmailSender>,
        whatsapp: Option<Arc<dyn WhatsAppSender>>,
        settings: NotifierSettings,
    ) -> Self {
        Self {
            db,
            email,
            whatsapp,
            settings,
        }
    }

    async fn load(
        &self,
        order_id: Uuid,
    ) -> Result<(order::Model, Vec<order_item::Model>, Option<user::Model>), NotificationError>
    {
        let db = self.db.as_ref();
        let order = order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or(NotificationError::OrderNotFound(order_id))?;
        let items = order.find_related(order_item::Entity).all(db).await?;
        let user = match order.user_id {
            Some(user_id) => user::Entity::find_by_id(user_id).one(db).await?,
            None => None,
        };
        Ok((order, items, user))
    }

    #[instrument(skip(self))]
    pub async fn order_created(&self, order_id: Uuid) -> Result<(), NotificationError> {
        let (order, items, user) = self.load(order_id).await?;
        self.notify_created(&order, &items, user.as_ref()).await
    }

    #[instrument(skip(self))]
    pub async fn status_changed(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), NotificationError> {
        let (order, items, user) = self.load(order_id).await?;
        self.notify_status(&order, &items, user.as_ref(), status)
            .await
    }

    pub(crate) async fn notify_created(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
        user: Option<&user::Model>,
    ) -> Result<(), NotificationError> {
        let contact = resolve_contact(order, user);
        let mut outcome = Ok(());

        if let Some(to) = contact.email.clone() {
            let message = EmailMessage {
                to,
                subject: templates::confirmation_subject(&self.settings.store_name),
                html: templates::confirmation_email(order, items, &self.settings.store_name),
            };
            if let Err(e) = self.email.send(message).await {
                warn!(order_id = %order.id, error = %e, "Order confirmation email failed");
                outcome = Err(e);
            }
        }

        if let (Some(to), true, Some(whatsapp)) =
            (contact.phone, contact.phone_verified, self.whatsapp.as_ref())
        {
            let message = WhatsAppMessage {
                to,
                template: templates::CONFIRMATION_TEMPLATE.to_string(),
                params: templates::confirmation_params(order, items.len()),
            };
            if let Err(e) = whatsapp.send(message).await {
                warn!(order_id = %order.id, error = %e, "Order confirmation WhatsApp failed");
                outcome = Err(e);
            }
        }

        outcome
    }

    pub(crate) async fn notify_status(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
        user: Option<&user::Model>,
        status: OrderStatus,
    ) -> Result<(), NotificationError> {
        let contact = resolve_contact(order, user);
        let mut outcome = Ok(());

        if let Some(to) = contact.email.clone() {
            let url = templates::order_url(&self.settings.public_base_url, &order.id);
            let message = EmailMessage {
                to,
                subject: templates::status_subject(order, status),
                html: templates::status_email(order, items, status, &url),
            };
            if let Err(e) = self.email.send(message).await {
                warn!(order_id = %order.id, %status, error = %e, "Status email failed");
                outcome = Err(e);
            }
        }

        if !self.settings.whatsapp_status_updates {
            debug!(order_id = %order.id, "WhatsApp status updates disabled");
            return outcome;
        }

        let template = templates::status_template(
            order,
            status,
            &self.settings.public_base_url,
            Utc::now(),
        );
        if let (Some(to), Some(whatsapp), Some((template, params))) =
            (contact.phone, self.whatsapp.as_ref(), template)
        {
            let message = WhatsAppMessage {
                to,
                template: template.to_string(),
                params,
            };
            if let Err(e) = whatsapp.send(message).await {
                warn!(order_id = %order.id, %status, error = %e, "Status WhatsApp failed");
                outcome = Err(e);
            }
        }

        outcome
    }
}
