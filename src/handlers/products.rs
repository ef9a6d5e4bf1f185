use axum::{
    extract::{Path, State},
    response::Json,
};
use uuid::Uuid;

use crate::{services::products::ProductPricing, ApiResponse, ApiResult, AppState};

/// Effective prices for every option of a product
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}/pricing",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Pricing view", body = ApiResponse<ProductPricing>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Products"
)]
pub async fn product_pricing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ProductPricing> {
    let pricing = state.services.products.pricing(id).await?;
    Ok(Json(ApiResponse::success(pricing)))
}
