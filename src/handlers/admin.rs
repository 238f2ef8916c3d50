use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use validator::Validate;

use crate::errors::ServiceError;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSettingRequest {
    pub admin_id: i64,
    #[validate(length(min = 1, max = 64))]
    pub key: String,
    #[validate(length(max = 1024))]
    pub value: String,
}

/// Upserts a setting. Callers outside the admin list get 403 and the change
/// lands in the audit trail.
pub async fn update_setting(
    State(state): State<AppState>,
    Json(payload): Json<UpdateSettingRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;
    state
        .services
        .settings
        .set_for_admin(payload.admin_id, &payload.key, &payload.value)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ResetProfitRequest {
    pub admin_id: i64,
}

/// Zeroes the profit accumulators; sold-quantity counters are untouched.
pub async fn reset_profit_counters(
    State(state): State<AppState>,
    Json(payload): Json<ResetProfitRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .ledger
        .reset_profit_counters(payload.admin_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
