//! Payment reconciliation: manual bank-transfer review and PayFast
//! notifications. Status changes go through the order state machine.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::PayFastConfig,
    entities::order::{self, OrderStatus, PaymentMethod, PaymentResult, PaymentStatus},
    errors::ServiceError,
    events::EventSender,
    payfast::{self, GoPayFastCheckout, GoPayFastClient, PayFastError},
    services::order_status::{self, can_transition, find_order, OrderPatch, Transition},
};

pub const GATEWAY_COMPLETE: &str = "COMPLETE";

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub payment_status: String,
}

/// Admin decision on a bank-transfer proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentDecision {
    Confirmed,
    Declined,
}

impl PaymentDecision {
    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        match value {
            "Confirmed" => Ok(Self::Confirmed),
            "Declined" => Ok(Self::Declined),
            _ => Err(ServiceError::ValidationError(
                "Invalid paymentStatus. Must be \"Confirmed\" or \"Declined\".".to_string(),
            )),
        }
    }
}

/// Status a gateway notification asks for, if the state machine allows it.
/// A repeat of the current status is a no-op.
pub fn gateway_target(current: OrderStatus, gateway_status: &str) -> Option<OrderStatus> {
    let requested = if gateway_status == GATEWAY_COMPLETE {
        OrderStatus::Processing
    } else {
        OrderStatus::Cancelled
    };
    (requested != current && can_transition(current, requested)).then_some(requested)
}

fn decision_target(order: &order::Model, decision: PaymentDecision) -> Option<OrderStatus> {
    match decision {
        PaymentDecision::Confirmed => (order.payment_method == PaymentMethod::BankTransfer
            && order.status == OrderStatus::Pending)
            .then_some(OrderStatus::Processing),
        PaymentDecision::Declined => {
            can_transition(order.status, OrderStatus::Cancelled).then_some(OrderStatus::Cancelled)
        }
    }
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    events: EventSender,
    payfast: PayFastConfig,
    gopayfast: Option<GoPayFastClient>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        events: EventSender,
        payfast: PayFastConfig,
        gopayfast: Option<GoPayFastClient>,
    ) -> Self {
        Self {
            db,
            events,
            payfast,
            gopayfast,
        }
    }

    fn finish(&self, transition: &Transition) {
        if transition.changed() {
            self.events.emit(transition.event());
        }
    }

    /// Confirms or declines a payment. Declining cancels the order through the
    /// state machine, which puts the stock back once.
    #[instrument(skip(self))]
    pub async fn verify_payment(
        &self,
        order_id: Uuid,
        payment_status: &str,
    ) -> Result<order::Model, ServiceError> {
        let decision = PaymentDecision::parse(payment_status)?;

        let txn = self.db.begin().await?;
        let current = find_order(&txn, order_id).await?;
        let target = decision_target(&current, decision);
        let payment_status = match decision {
            PaymentDecision::Confirmed => PaymentStatus::Confirmed,
            PaymentDecision::Declined => PaymentStatus::Declined,
        };

        let transition = order_status::apply(
            &txn,
            &current,
            target,
            OrderPatch {
                payment_status: Some(payment_status),
                ..Default::default()
            },
        )
        .await?;
        txn.commit().await?;

        info!(%payment_status, from = %transition.from, to = %transition.to, "Payment reviewed");
        self.finish(&transition);
        Ok(transition.order)
    }

    /// Handles a PayFast notification. The signature is checked before
    /// anything is read or written. Repeats only refresh the payment result.
    #[instrument(skip(self, payload), fields(m_payment_id = payload.get("m_payment_id").map(String::as_str)))]
    pub async fn handle_gateway_notification(
        &self,
        payload: BTreeMap<String, String>,
    ) -> Result<order::Model, ServiceError> {
        if !payfast::verify_notification(&payload, self.payfast.passphrase.as_deref()) {
            warn!("Rejected gateway notification with bad signature");
            return Err(ServiceError::InvalidSignature);
        }

        let not_found = || ServiceError::NotFound("Order not found".to_string());
        let order_id = payload
            .get("m_payment_id")
            .and_then(|id| Uuid::parse_str(id.trim()).ok())
            .ok_or_else(not_found)?;

        let txn = self.db.begin().await?;
        let current = find_order(&txn, order_id).await?;

        let gateway_status = payload.get("payment_status").cloned().unwrap_or_default();
        let target = gateway_target(current.status, &gateway_status);
        if target.is_none() {
            info!(status = %current.status, %gateway_status, "Gateway status leaves order status unchanged");
        }

        let payment_result = PaymentResult {
            id: payload.get("pf_payment_id").cloned(),
            status: Some(gateway_status),
            update_time: Some(Utc::now()),
            redirect_url: current
                .payment_result
                .as_ref()
                .and_then(|r| r.redirect_url.clone()),
            raw: payload,
        };

        let transition = order_status::apply(
            &txn,
            &current,
            target,
            OrderPatch {
                payment_result: Some(payment_result),
                ..Default::default()
            },
        )
        .await?;
        txn.commit().await?;

        self.finish(&transition);
        Ok(transition.order)
    }

    /// Prepares the GoPayFast hosted checkout form for an open order.
    #[instrument(skip(self))]
    pub async fn initiate_gopayfast(&self, order_id: Uuid) -> Result<GoPayFastCheckout, ServiceError> {
        let client = self.gopayfast.as_ref().ok_or(PayFastError::NotConfigured)?;
        let order = find_order(&*self.db, order_id).await?;
        if order.status.is_terminal() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order is {} and cannot be paid",
                order.status
            )));
        }
        Ok(client.checkout(&order).await?)
    }
}
