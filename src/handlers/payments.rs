use axum::{
    extract::{Path, State},
    response::Json,
};
use uuid::Uuid;

use crate::{payfast::GoPayFastCheckout, ApiResponse, ApiResult, AppState};

/// Start a GoPayFast hosted checkout
///
/// Returns the form the client posts to the gateway.
#[utoipa::path(
    get,
    path = "/api/v1/payfast/initiate/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Checkout form", body = ApiResponse<GoPayFastCheckout>),
        (status = 400, description = "Gateway not configured or order closed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway token unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn initiate_gopayfast(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<GoPayFastCheckout> {
    let checkout = state
        .services
        .payments
        .initiate_gopayfast(order_id)
        .await?;
    Ok(Json(ApiResponse::success(checkout)))
}
