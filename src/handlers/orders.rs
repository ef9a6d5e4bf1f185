use std::collections::BTreeMap;

use async_trait::async_trait;
use axum::{
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::Json,
    Form,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::order::{self, PaymentMethod, ShippingAddress},
    errors::ServiceError,
    services::{
        cart::CartLine,
        orders::{
            check_payment_proof, check_shipping_address, CreateOrderRequest, OrderListQuery,
            OrderPage, OrderWithItems, SalesQuery, SalesStats,
        },
        payments::VerifyPaymentRequest,
    },
    ApiResponse, ApiResult, AppState,
};

const SCREENSHOT_FIELD: &str = "paymentScreenshot";

/// A file part taken from a multipart checkout.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Bytes,
}

/// Checkout body in either encoding, normalized to a typed request.
#[derive(Debug)]
pub struct CheckoutForm {
    pub request: CreateOrderRequest,
    pub screenshot: Option<UploadedFile>,
}

/// Loosely typed checkout fields. `items` and `shippingAddress` arrive either
/// structured or as JSON text.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawCheckout {
    items: Value,
    shipping_address: Value,
    payment_method: Value,
    coupon_code: Option<String>,
}

fn decode_embedded(value: Value, field: &str) -> Result<Value, ServiceError> {
    match value {
        Value::String(text) if text.trim().is_empty() => Ok(Value::Null),
        Value::String(text) => serde_json::from_str(&text)
            .map_err(|_| ServiceError::ValidationError(format!("Invalid JSON in {}", field))),
        other => Ok(other),
    }
}

impl RawCheckout {
    fn set_text(&mut self, name: &str, text: String) {
        match name {
            "items" => self.items = Value::String(text),
            "shippingAddress" => self.shipping_address = Value::String(text),
            "paymentMethod" => self.payment_method = Value::String(text),
            "couponCode" => self.coupon_code = Some(text),
            _ => {}
        }
    }

    fn into_request(self) -> Result<CreateOrderRequest, ServiceError> {
        let items: Vec<CartLine> = match decode_embedded(self.items, "items")? {
            Value::Null => Vec::new(),
            value => serde_json::from_value(value)
                .map_err(|e| ServiceError::ValidationError(format!("Invalid items: {}", e)))?,
        };

        let shipping_address: ShippingAddress =
            match decode_embedded(self.shipping_address, "shippingAddress")? {
                Value::Null => ShippingAddress::default(),
                value => serde_json::from_value(value).map_err(|e| {
                    ServiceError::ValidationError(format!("Invalid shipping address: {}", e))
                })?,
            };

        let payment_method: PaymentMethod = serde_json::from_value(self.payment_method)
            .map_err(|_| {
                ServiceError::ValidationError(
                    "Invalid payment method. Must be COD, BankTransfer or PayFast".to_string(),
                )
            })?;

        Ok(CreateOrderRequest {
            items,
            shipping_address,
            payment_method,
            coupon_code: self.coupon_code,
        })
    }
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false)
}

#[async_trait]
impl<S> FromRequest<S> for CheckoutForm
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        if !is_multipart(&request) {
            let Json(raw) = Json::<RawCheckout>::from_request(request, state)
                .await
                .map_err(|e| ServiceError::BadRequest(e.body_text()))?;
            return Ok(Self {
                request: raw.into_request()?,
                screenshot: None,
            });
        }

        let mut multipart = Multipart::from_request(request, state)
            .await
            .map_err(|e| ServiceError::BadRequest(e.body_text()))?;

        let mut raw = RawCheckout::default();
        let mut screenshot = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ServiceError::BadRequest(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == SCREENSHOT_FIELD {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServiceError::BadRequest(e.body_text()))?;
                screenshot = Some(UploadedFile { file_name, data });
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ServiceError::BadRequest(e.body_text()))?;
                raw.set_text(&name, text);
            }
        }

        Ok(Self {
            request: raw.into_request()?,
            screenshot,
        })
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(default)]
    pub tracking_id: Option<String>,
}

/// Place an order
///
/// Accepts `application/json` or `multipart/form-data`. Bank transfers must
/// attach a `paymentScreenshot` file.
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderWithItems>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid order", body = crate::errors::ErrorResponse),
        (status = 401, description = "Coupon used without signing in", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    form: CheckoutForm,
) -> Result<(StatusCode, Json<ApiResponse<OrderWithItems>>), ServiceError> {
    let CheckoutForm {
        request,
        screenshot,
    } = form;

    check_shipping_address(&request.shipping_address)?;
    check_payment_proof(request.payment_method, screenshot.is_some())?;

    let payment_proof = match (request.payment_method, screenshot) {
        (PaymentMethod::BankTransfer, Some(file)) => {
            Some(state.images.upload(&file.file_name, file.data).await?)
        }
        _ => None,
    };

    let order = match state
        .services
        .orders
        .create_order(request, user.as_ref(), payment_proof.clone())
        .await
    {
        Ok(order) => order,
        Err(err) => {
            // No order points at the proof once checkout fails
            if let Some(proof) = payment_proof {
                if let Err(e) = state.images.delete(&proof).await {
                    warn!(public_id = %proof.public_id, error = %e, "Failed to remove orphaned payment proof");
                }
            }
            return Err(err);
        }
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

/// Orders placed by the caller, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders/my-orders",
    responses(
        (status = 200, description = "Caller's orders", body = ApiResponse<Vec<OrderWithItems>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn my_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<OrderWithItems>> {
    let orders = state.services.orders.my_orders(user.user_id).await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// List all orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Page of orders", body = ApiResponse<OrderPage>),
        (status = 400, description = "Invalid status filter", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> ApiResult<OrderPage> {
    let page = state.services.orders.list(query).await?;
    Ok(Json(ApiResponse::success(page)))
}

/// Get an order with its items
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order found", body = ApiResponse<OrderWithItems>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderWithItems> {
    let order = state.services.orders.get(id, &user).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Move an order through its lifecycle
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<order::Model>),
        (status = 400, description = "Invalid or illegal status", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent modification", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateStatusRequest>,
) -> ApiResult<order::Model> {
    let order = state
        .services
        .order_status
        .update_status(id, &body.status, body.tracking_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Confirm or decline a bank-transfer payment
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/verify-payment",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment reviewed", body = ApiResponse<order::Model>),
        (status = 400, description = "Invalid paymentStatus", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<VerifyPaymentRequest>,
) -> ApiResult<order::Model> {
    let order = state
        .services
        .payments
        .verify_payment(id, &body.payment_status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// PayFast server-to-server notification
#[utoipa::path(
    post,
    path = "/api/v1/orders/notify",
    request_body(content = String, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Notification applied"),
        (status = 400, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn payment_notification(
    State(state): State<AppState>,
    Form(payload): Form<BTreeMap<String, String>>,
) -> Result<StatusCode, ServiceError> {
    match state
        .services
        .payments
        .handle_gateway_notification(payload)
        .await
    {
        Ok(order) => {
            info!(order_id = %order.id, status = %order.status, "Gateway notification processed");
            Ok(StatusCode::OK)
        }
        Err(e) => {
            warn!(error = %e, "Gateway notification rejected");
            Err(e)
        }
    }
}

/// Sales figures for a period
#[utoipa::path(
    get,
    path = "/api/v1/orders/sales",
    params(SalesQuery),
    responses(
        (status = 200, description = "Sales statistics", body = ApiResponse<SalesStats>),
        (status = 400, description = "Invalid date range", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn sales_stats(
    State(state): State<AppState>,
    Query(query): Query<SalesQuery>,
) -> ApiResult<SalesStats> {
    let stats = state.services.orders.sales_stats(query).await?;
    Ok(Json(ApiResponse::success(stats)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn structured_checkout_is_accepted() {
        let raw: RawCheckout = serde_json::from_value(json!({
            "items": [{
                "productId": Uuid::nil(),
                "priceOptionId": Uuid::nil(),
                "quantity": 2
            }],
            "shippingAddress": {
                "fullName": "Sana Iqbal",
                "address": "12 Canal Road",
                "city": "Lahore",
                "country": "Pakistan",
                "email": "sana@example.com",
                "phone": "03001234567"
            },
            "paymentMethod": "COD"
        }))
        .unwrap();

        let request = raw.into_request().unwrap();
        assert_eq!(request.items.len(), 1);
        assert_eq!(request.items[0].quantity, 2);
        assert_eq!(request.payment_method, PaymentMethod::Cod);
        assert_eq!(request.shipping_address.city, "Lahore");
        assert!(request.coupon_code.is_none());
    }

    #[test]
    fn string_encoded_fields_are_decoded() {
        let mut raw = RawCheckout::default();
        raw.set_text(
            "items",
            json!([{"productId": Uuid::nil(), "priceOptionId": Uuid::nil(), "quantity": 1}])
                .to_string(),
        );
        raw.set_text(
            "shippingAddress",
            json!({"fullName": "Bilal", "city": "Karachi"}).to_string(),
        );
        raw.set_text("paymentMethod", "BankTransfer".into());
        raw.set_text("couponCode", "save10".into());

        let request = raw.into_request().unwrap();
        assert_eq!(request.items.len(), 1);
        assert_eq!(request.payment_method, PaymentMethod::BankTransfer);
        assert_eq!(request.shipping_address.full_name, "Bilal");
        assert_eq!(request.coupon_code.as_deref(), Some("save10"));
    }

    #[test]
    fn missing_address_surfaces_as_missing_fields() {
        let raw: RawCheckout = serde_json::from_value(json!({
            "items": [],
            "paymentMethod": "COD"
        }))
        .unwrap();
        let request = raw.into_request().unwrap();
        let err = check_shipping_address(&request.shipping_address).unwrap_err();
        assert!(err.response_message().starts_with("Missing shipping fields: fullName"));
    }

    #[test]
    fn malformed_embedded_json_is_rejected() {
        let mut raw = RawCheckout::default();
        raw.set_text("items", "[{not json".into());
        raw.set_text("paymentMethod", "COD".into());
        assert_matches!(
            raw.into_request(),
            Err(ServiceError::ValidationError(msg)) if msg == "Invalid JSON in items"
        );
    }

    #[test]
    fn unknown_payment_method_is_rejected() {
        let raw: RawCheckout = serde_json::from_value(json!({
            "items": [],
            "paymentMethod": "Crypto"
        }))
        .unwrap();
        assert_matches!(raw.into_request(), Err(ServiceError::ValidationError(_)));
    }
}
