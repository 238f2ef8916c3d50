use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::ServiceError;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterUserRequest {
    pub user_id: i64,
    #[validate(length(min = 1, max = 128))]
    pub display_name: String,
    pub referrer_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user_id: i64,
    pub display_name: String,
    pub language: String,
    pub stars_bought: i64,
    pub referral_bonus: rust_decimal::Decimal,
    pub referrer_id: Option<i64>,
}

impl From<crate::entities::user::Model> for UserResponse {
    fn from(u: crate::entities::user::Model) -> Self {
        Self {
            user_id: u.id,
            display_name: u.display_name,
            language: u.language,
            stars_bought: u.stars_bought,
            referral_bonus: u.referral_bonus,
            referrer_id: u.referrer_id,
        }
    }
}

/// Registers a user (idempotent). `referrer_id` is only honored on first
/// contact.
pub async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterUserRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;
    let user = state
        .services
        .users
        .register(payload.user_id, &payload.display_name, payload.referrer_id)
        .await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let user = state.services.users.get(user_id).await?;
    Ok(Json(UserResponse::from(user)))
}

/// Referral bonus grants credited to this user, oldest first.
pub async fn bonus_history(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    // 404 for unknown users rather than an empty history
    state.services.users.get(user_id).await?;
    let history = state.services.ledger.bonus_history(user_id).await?;
    Ok(Json(history))
}
