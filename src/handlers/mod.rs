pub mod coupons;
pub mod orders;
pub mod payments;
pub mod products;
pub mod settings;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    payfast::GoPayFastClient,
    services::{
        coupons::CouponService, order_status::OrderStatusService, orders::OrderService,
        payments::PaymentService, products::ProductService, settings::SettingsService,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
    pub payments: Arc<PaymentService>,
    pub coupons: Arc<CouponService>,
    pub settings: Arc<SettingsService>,
    pub products: Arc<ProductService>,
}

impl AppServices {
    /// Wires every service against one pool and event channel.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> Result<Self, ServiceError> {
        let gopayfast = config
            .gopayfast
            .clone()
            .map(GoPayFastClient::new)
            .transpose()?;

        Ok(Self {
            orders: Arc::new(OrderService::new(
                db_pool.clone(),
                event_sender.clone(),
                config.payfast.clone(),
            )),
            order_status: Arc::new(OrderStatusService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            payments: Arc::new(PaymentService::new(
                db_pool.clone(),
                event_sender,
                config.payfast.clone(),
                gopayfast,
            )),
            coupons: Arc::new(CouponService::new(db_pool.clone())),
            settings: Arc::new(SettingsService::new(db_pool.clone())),
            products: Arc::new(ProductService::new(db_pool)),
        })
    }
}
