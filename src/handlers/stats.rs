use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::errors::ServiceError;
use crate::AppState;

const DEFAULT_LEADERBOARD_SIZE: u64 = 10;

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<u64>,
}

/// Aggregate sale counters.
pub async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    let stats = state.services.ledger.stats().await?;
    Ok(Json(stats))
}

/// Referrers ranked by users brought in.
pub async fn top_referrers(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let limit = query.limit.unwrap_or(DEFAULT_LEADERBOARD_SIZE);
    let ranks = state.services.ledger.top_referrers_by_count(limit).await?;
    Ok(Json(ranks))
}

/// Buyers ranked by cumulative stars purchased.
pub async fn top_purchasers(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let limit = query.limit.unwrap_or(DEFAULT_LEADERBOARD_SIZE);
    let ranks = state
        .services
        .ledger
        .top_purchasers_by_volume(limit)
        .await?;
    Ok(Json(ranks))
}
