//! Storefront API Library
//!
//! Catalog pricing, coupons, stock reservation, checkout and payment
//! reconciliation for the storefront.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod images;
pub mod middleware_helpers;
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod payfast;
pub mod services;
pub mod tracing;

use axum::{
    extract::{DefaultBodyLimit, State},
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::services::ServeDir;
use utoipa::ToSchema;

use crate::auth::{AuthRouterExt, AuthService, ADMIN_ROLE};
use crate::images::ImageStore;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
    pub images: Arc<dyn ImageStore>,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn validation_errors_response_includes_metadata() {
        let response = crate::tracing::scope_request_id(
            crate::tracing::RequestId::new("meta-validation"),
            async { ApiResponse::<()>::validation_errors(vec!["missing".into()]) },
        )
        .await;

        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some("Validation failed"));
        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-validation"));
    }

    #[test]
    fn error_response_carries_message_without_data() {
        let response = ApiResponse::<()>::error("Order not found".into());
        assert!(!response.success);
        assert!(response.data.is_none());
        assert_eq!(response.message.as_deref(), Some("Order not found"));
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Routes mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    // Storefront reads and the gateway callback need no token
    let public = Router::new()
        .route("/status", get(api_status))
        .route("/coupons", get(handlers::coupons::list_active_coupons))
        .route("/settings", get(handlers::settings::get_settings))
        .route(
            "/products/:id/pricing",
            get(handlers::products::product_pricing),
        )
        .route(
            "/orders/notify",
            post(handlers::orders::payment_notification),
        )
        .route(
            "/payfast/initiate/:order_id",
            get(handlers::payments::initiate_gopayfast),
        );

    // Guests may check out; a token, when present, must be valid
    let checkout = Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .with_optional_auth();

    let customer = Router::new()
        .route("/orders/my-orders", get(handlers::orders::my_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/coupons/validate",
            post(handlers::coupons::validate_coupon),
        )
        .with_auth();

    let orders_admin = Router::new()
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/sales", get(handlers::orders::sales_stats))
        .route(
            "/orders/:id/status",
            put(handlers::orders::update_order_status),
        )
        .route(
            "/orders/:id/verify-payment",
            put(handlers::orders::verify_payment),
        )
        .with_role(ADMIN_ROLE);

    let coupons_admin = Router::new()
        .route("/coupons", post(handlers::coupons::create_coupon))
        .route("/coupons/all", get(handlers::coupons::list_all_coupons))
        .route(
            "/coupons/:code",
            put(handlers::coupons::update_coupon).delete(handlers::coupons::delete_coupon),
        )
        .with_role(ADMIN_ROLE);

    let settings_admin = Router::new()
        .route("/settings", put(handlers::settings::update_settings))
        .with_role(ADMIN_ROLE);

    Router::new()
        .merge(public)
        .merge(checkout)
        .merge(customer)
        .merge(orders_admin)
        .merge(coupons_admin)
        .merge(settings_admin)
}

/// Full application router: API, docs, uploaded files and the shared
/// request middleware. CORS and compression are added by the binary.
pub fn app_router(state: AppState, auth_service: Arc<AuthService>) -> Router {
    let body_limit = state.config.max_upload_bytes + 64 * 1024;
    let mut app = Router::<AppState>::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui());

    let upload_prefix = state.config.upload_base_url.trim_end_matches('/').to_string();
    if upload_prefix.starts_with('/') && upload_prefix.len() > 1 {
        app = app.nest_service(&upload_prefix, ServeDir::new(&state.config.upload_dir));
    }

    app.layer(DefaultBodyLimit::max(body_limit))
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        // Inject AuthService into request extensions for auth middleware
        .layer(axum::middleware::from_fn_with_state(
            auth_service,
            |State(auth): State<Arc<AuthService>>,
             mut req: axum::extract::Request,
             next: axum::middleware::Next| async move {
                req.extensions_mut().insert(auth);
                next.run(req).await
            },
        ))
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

/// Service version and build metadata
#[utoipa::path(
    get,
    path = "/api/v1/status",
    responses((status = 200, description = "Service status", body = ApiResponse<Value>)),
    tag = "Health"
)]
pub async fn api_status() -> ApiResult<Value> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git": option_env!("GIT_HASH").unwrap_or("unknown"),
        "build_time": option_env!("BUILD_TIME").unwrap_or("unknown"),
        "service": "storefront-api",
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

/// Database connectivity check
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Health report", body = ApiResponse<Value>)),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": { "database": db_status },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}
