use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use crate::handlers::mpesa_handlers;
use crate::state::AppState;

pub fn mpesa_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(mpesa_health))
        .route("/test", get(mpesa_handlers::test_probe))
        .route("/initiate", post(mpesa_handlers::initiate_payment))
        .route("/callback", post(mpesa_handlers::mpesa_callback))
        .route("/status", post(mpesa_handlers::check_status))
        .route("/transactions", get(mpesa_handlers::list_transactions))
}

async fn mpesa_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "mpesa",
        "timestamp": Utc::now().to_rfc3339(),
        "features": ["stk-push", "callback", "status", "transactions"]
    }))
}
