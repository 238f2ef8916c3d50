use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};

use crate::errors::ServiceError;
use crate::services::conversation::ConversationEvent;
use crate::AppState;

/// Feeds one transport event into the order dialogue and returns the reply
/// the transport should render. Confirmation is returned as `ready_to_open`;
/// the transport follows up with the open-order call.
pub async fn advance_conversation(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(event): Json<ConversationEvent>,
) -> Result<impl IntoResponse, ServiceError> {
    let reply = state.services.conversation.advance(user_id, event).await?;
    Ok(Json(reply))
}

/// The rail options currently offered to buyers.
pub async fn enabled_rails(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let rails = state.services.conversation.enabled_rails().await?;
    Ok(Json(rails))
}
