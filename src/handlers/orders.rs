use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::errors::{ErrorResponse, ServiceError};
use crate::services::localization::{text, DEFAULT_LANGUAGE};
use crate::services::reconciliation::ReconcileOutcome;
use crate::services::{conversation::OrderDraft, pricing::PaymentRail};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct OpenOrderRequest {
    #[validate(length(min = 1, max = 128))]
    pub recipient: String,
    #[validate(range(min = 1))]
    pub quantity: i64,
    pub rail: PaymentRail,
}

async fn user_language(state: &AppState, user_id: i64) -> String {
    state
        .services
        .users
        .get(user_id)
        .await
        .map(|u| u.language)
        .unwrap_or_else(|_| DEFAULT_LANGUAGE.to_string())
}

/// Opens a payment request for a confirmed draft. Fails with 409 when an
/// order is already awaiting payment; a rail outage yields a localized
/// try-later message so the caller can relay it verbatim.
pub async fn open_order(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(payload): Json<OpenOrderRequest>,
) -> Result<Response, ServiceError> {
    payload.validate()?;
    let result = state
        .services
        .orders
        .open_order(
            user_id,
            OrderDraft {
                recipient: payload.recipient,
                quantity: payload.quantity,
                rail: payload.rail,
            },
        )
        .await;

    match result {
        Ok(response) => Ok((StatusCode::CREATED, Json(response)).into_response()),
        Err(err @ ServiceError::ExternalServiceError(_)) => {
            let language = user_language(&state, user_id).await;
            let message = state
                .services
                .localization
                .render(text::TRY_LATER, &language, &[])
                .await;
            let body = ErrorResponse {
                error: format!("{err}"),
                message,
                timestamp: Utc::now().to_rfc3339(),
            };
            Ok((err.status_code(), Json(body)).into_response())
        }
        Err(err) => Err(err),
    }
}

/// The user's order awaiting payment, if any.
pub async fn pending_order(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .pending_order(user_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("no order is awaiting payment".to_string()))?;
    Ok(Json(order))
}

/// On-demand payment check. Verifies the pending order against its rail,
/// fulfills it when the payment has landed, and reports the outcome in the
/// user's language.
pub async fn check_payment(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    // capture the order before reconciling; fulfillment clears the row
    let order = state.services.orders.pending_order(user_id).await?;
    let outcome = state.services.reconciliation.reconcile(user_id).await?;

    let language = user_language(&state, user_id).await;
    let localization = &state.services.localization;
    let message = match (outcome, order) {
        (ReconcileOutcome::PaidAndFulfilled, Some(order)) => Some(
            localization
                .render(
                    text::PAYMENT_CONFIRMED,
                    &language,
                    &[
                        ("quantity", order.quantity.to_string()),
                        ("recipient", order.recipient),
                    ],
                )
                .await,
        ),
        (ReconcileOutcome::NotYetPaid, _) => {
            Some(localization.render(text::NOT_YET_PAID, &language, &[]).await)
        }
        (ReconcileOutcome::IssuanceFailed, _) => {
            Some(localization.render(text::ISSUANCE_FAILED, &language, &[]).await)
        }
        _ => None,
    };

    Ok(Json(json!({ "outcome": outcome, "message": message })))
}
