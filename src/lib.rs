pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod rails;
pub mod services;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Json, Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use handlers::{AppServices, Collaborators};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: Arc<config::AppConfig>,
    pub services: AppServices,
}

/// Versioned API surface.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(handlers::users::register_user))
        .route("/users/:user_id", get(handlers::users::get_user))
        .route("/users/:user_id/bonuses", get(handlers::users::bonus_history))
        .route(
            "/users/:user_id/conversation",
            post(handlers::conversation::advance_conversation),
        )
        .route("/rails", get(handlers::conversation::enabled_rails))
        .route("/users/:user_id/orders", post(handlers::orders::open_order))
        .route(
            "/users/:user_id/orders/pending",
            get(handlers::orders::pending_order),
        )
        .route(
            "/users/:user_id/orders/check",
            post(handlers::orders::check_payment),
        )
        .route("/stats", get(handlers::stats::get_stats))
        .route("/stats/top-referrers", get(handlers::stats::top_referrers))
        .route("/stats/top-purchasers", get(handlers::stats::top_purchasers))
        .route("/admin/settings", put(handlers::admin::update_setting))
        .route(
            "/admin/stats/reset-profit",
            post(handlers::admin::reset_profit_counters),
        )
}

/// Builds the full application router with middleware applied.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
