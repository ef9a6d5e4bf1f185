use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    auth::AuthUser,
    entities::coupon,
    errors::ServiceError,
    services::{
        cart::CartLine,
        coupons::{CouponPreview, CreateCouponRequest, UpdateCouponRequest},
    },
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCouponRequest {
    pub code: String,
    /// Used only when `items` is empty
    #[serde(default)]
    pub cart_total: Option<Decimal>,
    #[serde(default)]
    pub items: Vec<CartLine>,
}

/// Dry-run a coupon against a cart
#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Coupon applies", body = ApiResponse<CouponPreview>),
        (status = 400, description = "Coupon rejected", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ValidateCouponRequest>,
) -> ApiResult<CouponPreview> {
    let preview = state
        .services
        .coupons
        .preview(&body.code, user.user_id, &body.items, body.cart_total)
        .await?;
    Ok(Json(ApiResponse::success(preview)))
}

/// Active, unexpired coupons
#[utoipa::path(
    get,
    path = "/api/v1/coupons",
    responses(
        (status = 200, description = "Active coupons", body = ApiResponse<Vec<coupon::Model>>),
    ),
    tag = "Coupons"
)]
pub async fn list_active_coupons(State(state): State<AppState>) -> ApiResult<Vec<coupon::Model>> {
    let coupons = state.services.coupons.list_active().await?;
    Ok(Json(ApiResponse::success(coupons)))
}

/// Every coupon, newest first
#[utoipa::path(
    get,
    path = "/api/v1/coupons/all",
    responses(
        (status = 200, description = "All coupons", body = ApiResponse<Vec<coupon::Model>>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Coupons"
)]
pub async fn list_all_coupons(State(state): State<AppState>) -> ApiResult<Vec<coupon::Model>> {
    let coupons = state.services.coupons.list_all().await?;
    Ok(Json(ApiResponse::success(coupons)))
}

/// Create a coupon
#[utoipa::path(
    post,
    path = "/api/v1/coupons",
    request_body = CreateCouponRequest,
    responses(
        (status = 201, description = "Coupon created", body = ApiResponse<coupon::Model>),
        (status = 400, description = "Invalid or duplicate coupon", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Coupons"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    Json(body): Json<CreateCouponRequest>,
) -> Result<(StatusCode, Json<ApiResponse<coupon::Model>>), ServiceError> {
    let coupon = state.services.coupons.create(body).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(coupon))))
}

/// Update a coupon by code
#[utoipa::path(
    put,
    path = "/api/v1/coupons/{code}",
    params(("code" = String, Path, description = "Coupon code, case-insensitive")),
    request_body = UpdateCouponRequest,
    responses(
        (status = 200, description = "Coupon updated", body = ApiResponse<coupon::Model>),
        (status = 400, description = "Invalid update", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Coupons"
)]
pub async fn update_coupon(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(body): Json<UpdateCouponRequest>,
) -> ApiResult<coupon::Model> {
    let coupon = state.services.coupons.update(&code, body).await?;
    Ok(Json(ApiResponse::success(coupon)))
}

/// Delete a coupon and its usage ledger
#[utoipa::path(
    delete,
    path = "/api/v1/coupons/{code}",
    params(("code" = String, Path, description = "Coupon code, case-insensitive")),
    responses(
        (status = 204, description = "Coupon deleted"),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Coupons"
)]
pub async fn delete_coupon(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<StatusCode, ServiceError> {
    state.services.coupons.delete(&code).await?;
    Ok(StatusCode::NO_CONTENT)
}
