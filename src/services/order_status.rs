//! Order status state machine.
//!
//! ```text
//! Pending -> Processing -> Shipped -> Delivered
//!    \___________\____________\_____> Cancelled | Returned
//! Delivered -> Returned
//! ```
//!
//! Every write is guarded by the order's `version` column, so two concurrent
//! transitions on the same order cannot both succeed and stock is restored
//! at most once.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    IntoActiveModel, ModelTrait, QueryFilter, TransactionTrait,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        order::{self, OrderStatus, PaymentResult, PaymentStatus},
        order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::inventory,
};

/// Whether `from -> to` is a legal move. Re-setting the current status is
/// allowed while the order is still open.
pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    match (from, to) {
        (f, t) if f == t => !f.is_terminal(),
        (Pending, Processing) | (Processing, Shipped) | (Shipped, Delivered) => true,
        (Pending | Processing | Shipped, Cancelled | Returned) => true,
        (Delivered, Returned) => true,
        _ => false,
    }
}

pub fn ensure_transition(from: OrderStatus, to: OrderStatus) -> Result<(), ServiceError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(ServiceError::ValidationError(format!(
            "Cannot change order status from {} to {}",
            from, to
        )))
    }
}

/// Extra columns written together with a status change.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub tracking_id: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_result: Option<PaymentResult>,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub order: order::Model,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    pub fn event(&self) -> Event {
        Event::OrderStatusChanged {
            order_id: self.order.id,
            old_status: self.from,
            new_status: self.to,
        }
    }
}

/// Writes `patch` and, when `target` is given, the new status. The caller has
/// already checked legality. Restores stock when the order first enters
/// Cancelled or Returned. Fails with `ConcurrentModification` if the order
/// row changed since it was read.
pub(crate) async fn apply<C: ConnectionTrait>(
    conn: &C,
    current: &order::Model,
    target: Option<OrderStatus>,
    patch: OrderPatch,
) -> Result<Transition, ServiceError> {
    let from = current.status;
    let to = target.unwrap_or(from);
    let now = Utc::now();

    let mut active = current.clone().into_active_model();
    active.status = Set(to);
    active.version = Set(current.version + 1);
    active.updated_at = Set(now);
    if let Some(tracking_id) = patch.tracking_id {
        active.tracking_id = Set(Some(tracking_id));
    }
    if let Some(payment_status) = patch.payment_status {
        active.payment_status = Set(payment_status);
    }
    if let Some(payment_result) = patch.payment_result {
        active.payment_result = Set(Some(payment_result));
    }
    if to == OrderStatus::Delivered && from != to {
        active.delivered_at = Set(Some(now));
    }

    let updated = order::Entity::update(active)
        .filter(order::Column::Version.eq(current.version))
        .exec(conn)
        .await
        .map_err(|e| match e {
            DbErr::RecordNotUpdated => {
                warn!(order_id = %current.id, "Order changed underneath status update");
                ServiceError::ConcurrentModification(current.id)
            }
            other => ServiceError::DatabaseError(other),
        })?;

    if from != to && to.restores_stock() {
        let items = updated.find_related(order_item::Entity).all(conn).await?;
        inventory::restore(conn, &items).await?;
        info!(order_id = %updated.id, lines = items.len(), "Stock restored");
    }

    Ok(Transition {
        order: updated,
        from,
        to,
    })
}

pub(crate) async fn find_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    order::Entity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))
}

#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    events: EventSender,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, events: EventSender) -> Self {
        Self { db, events }
    }

    /// Admin status update. `status` is matched case-insensitively.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        status: &str,
        tracking_id: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let target = OrderStatus::parse_target(status)
            .ok_or_else(|| ServiceError::ValidationError("Invalid status value".to_string()))?;

        let tracking_id = tracking_id
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        if target == OrderStatus::Shipped && tracking_id.is_none() {
            return Err(ServiceError::ValidationError(
                "Tracking ID is required for shipped orders".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let current = find_order(&txn, order_id).await?;
        ensure_transition(current.status, target)?;

        let transition = apply(
            &txn,
            &current,
            Some(target),
            OrderPatch {
                tracking_id,
                ..Default::default()
            },
        )
        .await?;
        txn.commit().await?;

        info!(from = %transition.from, to = %transition.to, "Order status updated");
        self.events.emit(transition.event());
        Ok(transition.order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PayFastConfig,
        db::{establish_connection_with_config, run_migrations, DbConfig},
        entities::{
            order::{PaymentMethod, ShippingAddress},
            price_option::{self, PriceOptionType},
            product,
        },
        events,
        services::{cart::CartLine, orders::{CreateOrderRequest, OrderService}},
    };
    use assert_matches::assert_matches;
    use rstest::rstest;
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveModelTrait, Set};
    use OrderStatus::*;

    #[rstest]
    #[case(Pending, Processing, true)]
    #[case(Processing, Shipped, true)]
    #[case(Shipped, Delivered, true)]
    #[case(Pending, Cancelled, true)]
    #[case(Shipped, Returned, true)]
    #[case(Delivered, Returned, true)]
    #[case(Processing, Processing, true)]
    #[case(Shipped, Shipped, true)]
    #[case(Pending, Shipped, false)]
    #[case(Processing, Delivered, false)]
    #[case(Delivered, Cancelled, false)]
    #[case(Delivered, Delivered, false)]
    #[case(Cancelled, Processing, false)]
    #[case(Cancelled, Cancelled, false)]
    #[case(Returned, Returned, false)]
    #[case(Shipped, Processing, false)]
    fn transition_table(#[case] from: OrderStatus, #[case] to: OrderStatus, #[case] ok: bool) {
        assert_eq!(can_transition(from, to), ok, "{from} -> {to}");
    }

    #[test]
    fn illegal_move_names_both_states() {
        let err = ensure_transition(Delivered, Processing).unwrap_err();
        assert_eq!(
            err.response_message(),
            "Cannot change order status from Delivered to Processing"
        );
    }

    #[test]
    fn nothing_leaves_cancelled() {
        for to in [Pending, Processing, Shipped, Delivered, Cancelled, Returned] {
            assert!(!can_transition(Cancelled, to));
        }
    }

    async fn seeded_order(db: &Arc<DatabaseConnection>, stock: i32, quantity: i32) -> (Uuid, Uuid) {
        let now = Utc::now();
        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Kalonji".to_string()),
            description: Set(None),
            image_url: Set(None),
            stock: Set(stock),
            sale_percentage: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&**db)
        .await
        .unwrap();
        let option = price_option::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product.id),
            option_type: Set(PriceOptionType::Packet),
            weight: Set(250),
            price: Set(dec!(400)),
            sale_price: Set(None),
            position: Set(0),
        }
        .insert(&**db)
        .await
        .unwrap();

        let (sender, _rx) = events::channel(8);
        let orders = OrderService::new(db.clone(), sender, PayFastConfig::default());
        let created = orders
            .create_order(
                CreateOrderRequest {
                    items: vec![CartLine {
                        product_id: product.id,
                        price_option_id: option.id,
                        quantity,
                    }],
                    shipping_address: ShippingAddress {
                        full_name: "Bilal Ahmed".to_string(),
                        address: "4 Mall Road".to_string(),
                        city: "Lahore".to_string(),
                        country: "Pakistan".to_string(),
                        email: "bilal@example.com".to_string(),
                        phone: "03211234567".to_string(),
                        postal_code: None,
                    },
                    payment_method: PaymentMethod::Cod,
                    coupon_code: None,
                },
                None,
                None,
            )
            .await
            .unwrap();
        (created.order.id, product.id)
    }

    async fn stock_of(db: &DatabaseConnection, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(db)
            .await
            .unwrap()
            .unwrap()
            .stock
    }

    #[tokio::test]
    async fn stale_version_loses_and_restores_nothing() {
        let pool = establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();
        run_migrations(&pool).await.unwrap();
        let db = Arc::new(pool);

        let (order_id, product_id) = seeded_order(&db, 6, 4).await;
        assert_eq!(stock_of(&db, product_id).await, 2);

        // Both writers read the same row before either commits
        let stale = find_order(&*db, order_id).await.unwrap();

        let first = apply(&*db, &stale, Some(Cancelled), OrderPatch::default())
            .await
            .unwrap();
        assert_eq!(first.order.status, Cancelled);
        assert_eq!(first.order.version, stale.version + 1);
        assert_eq!(stock_of(&db, product_id).await, 6);

        let second = apply(&*db, &stale, Some(Returned), OrderPatch::default()).await;
        assert_matches!(second, Err(ServiceError::ConcurrentModification(id)) if id == order_id);
        assert_eq!(stock_of(&db, product_id).await, 6);
        assert_eq!(find_order(&*db, order_id).await.unwrap().status, Cancelled);
    }
}
