/*
 * Responsibility
 * - GET /authorize: the forward-auth check called by the proxy for every request
 */
use axum::{extract::State, response::Response};

use crate::api::extractors::forwarded::ForwardedRequest;
use crate::api::response::decision_response;
use crate::error::AppError;
use crate::state::AppState;

pub async fn authorize(
    State(state): State<AppState>,
    ForwardedRequest(ctx): ForwardedRequest,
) -> Result<Response, AppError> {
    let decision = state.engine.authorize(&ctx);
    decision_response(decision, state.engine.cookie_settings(ctx.host()))
}
