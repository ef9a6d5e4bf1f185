#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use storefront_api::{
    auth::{AuthConfig, AuthService, AuthUser, ADMIN_ROLE},
    config::AppConfig,
    db,
    entities::{
        coupon::{self, DiscountType},
        price_option::{self, PriceOptionType},
        product, user,
    },
    events::{self, Event},
    handlers::AppServices,
    images::LocalImageStore,
    payfast,
    services::{cart::CartLine, coupons::CreateCouponRequest, orders::CreateOrderRequest},
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const PAYFAST_PASSPHRASE: &str = "jt7NOE43FZPn";

/// Application state backed by a private in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub auth: Arc<AuthService>,
    events: Mutex<mpsc::Receiver<Event>>,
    _uploads: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_event_capacity(1024).await
    }

    /// Same as [`TestApp::new`] with a custom event channel size. Events are
    /// only drained by [`TestApp::take_events`].
    pub async fn with_event_capacity(capacity: usize) -> Self {
        let uploads = tempfile::tempdir().expect("temp upload dir");

        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "integration_test_secret_that_is_comfortably_longer_than_sixty_four_characters_0123".to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection keeps every query on the same in-memory database
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.upload_dir = uploads.path().to_string_lossy().into_owned();
        cfg.payfast.merchant_id = "10000100".to_string();
        cfg.payfast.merchant_key = "46f0cd694581a".to_string();
        cfg.payfast.return_url = "https://shop.test/success".to_string();
        cfg.payfast.cancel_url = "https://shop.test/cancel".to_string();
        cfg.payfast.notify_url = "https://api.shop.test/api/v1/orders/notify".to_string();
        cfg.payfast.passphrase = Some(PAYFAST_PASSPHRASE.to_string());

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_sender, event_rx) = events::channel(capacity);
        let auth = Arc::new(AuthService::new(AuthConfig::from(&cfg)));
        let services = AppServices::new(db_arc.clone(), event_sender.clone(), &cfg)
            .expect("services should wire up");
        let images = Arc::new(LocalImageStore::new(
            cfg.upload_dir.clone(),
            cfg.upload_base_url.clone(),
            cfg.max_upload_bytes,
        ));

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
            images,
        };
        let router = storefront_api::app_router(state.clone(), auth.clone());

        Self {
            router,
            state,
            auth,
            events: Mutex::new(event_rx),
            _uploads: uploads,
        }
    }

    pub fn upload_root(&self) -> &std::path::Path {
        self._uploads.path()
    }

    /// Events emitted so far that have not been taken yet.
    pub fn take_events(&self) -> Vec<Event> {
        let mut rx = self.events.lock().expect("event receiver lock");
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn customer(&self) -> (AuthUser, String) {
        self.account(vec!["user".to_string()])
    }

    pub fn admin(&self) -> (AuthUser, String) {
        self.account(vec![ADMIN_ROLE.to_string()])
    }

    fn account(&self, roles: Vec<String>) -> (AuthUser, String) {
        let user_id = Uuid::new_v4();
        let token = self
            .auth
            .issue_token(
                user_id,
                Some("Ayesha Khan".to_string()),
                Some("ayesha@example.com".to_string()),
                roles.clone(),
            )
            .expect("issue token");
        let user = AuthUser {
            user_id,
            name: Some("Ayesha Khan".to_string()),
            email: Some("ayesha@example.com".to_string()),
            roles,
            token_id: Uuid::new_v4().to_string(),
        };
        (user, token)
    }

    pub async fn seed_user(&self, account: &AuthUser) -> user::Model {
        user::ActiveModel {
            id: Set(account.user_id),
            name: Set(account.name.clone().unwrap_or_default()),
            email: Set(account.email.clone().unwrap_or_default()),
            phone: Set(Some("03001234567".to_string())),
            role: Set(if account.is_admin() {
                user::UserRole::Admin
            } else {
                user::UserRole::User
            }),
            verification_method: Set(Some(user::VerificationMethod::Email)),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    /// A product with one packet option priced at `price`.
    pub async fn seed_product(
        &self,
        name: &str,
        stock: i32,
        price: Decimal,
    ) -> (product::Model, price_option::Model) {
        self.seed_product_with_sale(name, stock, price, None, None).await
    }

    pub async fn seed_product_with_sale(
        &self,
        name: &str,
        stock: i32,
        price: Decimal,
        sale_price: Option<Decimal>,
        sale_percentage: Option<Decimal>,
    ) -> (product::Model, price_option::Model) {
        let now = Utc::now();
        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(Some(format!("{} seeded for tests", name))),
            image_url: Set(Some(format!("https://cdn.shop.test/{}.jpg", name.to_lowercase()))),
            stock: Set(stock),
            sale_percentage: Set(sale_percentage),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product");

        let option = price_option::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product.id),
            option_type: Set(PriceOptionType::Packet),
            weight: Set(500),
            price: Set(price),
            sale_price: Set(sale_price),
            position: Set(0),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed price option");

        (product, option)
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .expect("load product")
            .expect("product exists")
            .stock
    }

    pub async fn coupon(&self, code: &str) -> coupon::Model {
        coupon::Entity::find()
            .all(&*self.state.db)
            .await
            .expect("load coupons")
            .into_iter()
            .find(|c| c.code == code)
            .expect("coupon exists")
    }

    pub async fn seed_coupon(&self, request: CreateCouponRequest) -> coupon::Model {
        self.state
            .services
            .coupons
            .create(request)
            .await
            .expect("seed coupon")
    }

    /// Sends a request with an optional bearer token and JSON body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize json request body"))
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).expect("build request")).await
    }

    pub async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

pub fn coupon_request(code: &str, discount_type: DiscountType, value: Decimal) -> CreateCouponRequest {
    CreateCouponRequest {
        code: code.to_string(),
        discount_type,
        discount_value: value,
        min_purchase: None,
        max_purchase: None,
        total_coupons: 100,
        max_uses_per_user: Some(1),
        start_date: Some(Utc::now() - Duration::hours(1)),
        expiry_date: Utc::now() + Duration::days(7),
        eligible_users: Vec::new(),
        eligible_products: Vec::new(),
    }
}

pub fn address() -> storefront_api::entities::order::ShippingAddress {
    storefront_api::entities::order::ShippingAddress {
        full_name: "Ayesha Khan".to_string(),
        address: "12 Canal View".to_string(),
        city: "Lahore".to_string(),
        country: "Pakistan".to_string(),
        email: "ayesha@example.com".to_string(),
        phone: "03001234567".to_string(),
        postal_code: None,
    }
}

pub fn line(option: &price_option::Model, quantity: i32) -> CartLine {
    CartLine {
        product_id: option.product_id,
        price_option_id: option.id,
        quantity,
    }
}

pub fn order_request(
    items: Vec<CartLine>,
    payment_method: storefront_api::entities::order::PaymentMethod,
    coupon_code: Option<&str>,
) -> CreateOrderRequest {
    CreateOrderRequest {
        items,
        shipping_address: address(),
        payment_method,
        coupon_code: coupon_code.map(str::to_string),
    }
}

/// Gateway notification signed with the test passphrase.
pub fn signed_notification(order_id: Uuid, status: &str) -> BTreeMap<String, String> {
    let mut payload = BTreeMap::new();
    payload.insert("m_payment_id".to_string(), order_id.to_string());
    payload.insert("pf_payment_id".to_string(), "1089250".to_string());
    payload.insert("payment_status".to_string(), status.to_string());
    payload.insert("item_name".to_string(), format!("Order #{}", order_id));
    payload.insert("amount_gross".to_string(), "1450.00".to_string());
    let signature = payfast::sign(
        payload.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        Some(PAYFAST_PASSPHRASE),
    );
    payload.insert("signature".to_string(), signature);
    payload
}

pub fn form_encode(payload: &BTreeMap<String, String>) -> String {
    payload
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}

pub fn assert_status(response: &axum::response::Response, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status code");
}
