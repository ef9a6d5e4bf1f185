use axum::{extract::State, response::Json};

use crate::{
    entities::settings, services::settings::UpdateSettingsRequest, ApiResponse, ApiResult,
    AppState,
};

/// Store-wide shipping and COD settings
#[utoipa::path(
    get,
    path = "/api/v1/settings",
    responses(
        (status = 200, description = "Current settings", body = ApiResponse<settings::Model>),
    ),
    tag = "Settings"
)]
pub async fn get_settings(State(state): State<AppState>) -> ApiResult<settings::Model> {
    let current = state.services.settings.get().await?;
    Ok(Json(ApiResponse::success(current)))
}

#[utoipa::path(
    put,
    path = "/api/v1/settings",
    request_body = UpdateSettingsRequest,
    responses(
        (status = 200, description = "Settings updated", body = ApiResponse<settings::Model>),
        (status = 400, description = "Negative value", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Settings"
)]
pub async fn update_settings(
    State(state): State<AppState>,
    Json(body): Json<UpdateSettingsRequest>,
) -> ApiResult<settings::Model> {
    let updated = state.services.settings.update(body).await?;
    Ok(Json(ApiResponse::success(updated)))
}
