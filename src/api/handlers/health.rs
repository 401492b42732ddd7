/*
 * Responsibility
 * - GET /health: liveness check for the proxy and orchestrator (no auth)
 * - Reports the size of the loaded rule table
 */
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let rules = state.engine.policy().rules().len();
    (StatusCode::OK, Json(json!({"status": "ok", "rules": rules})))
}
