/*
 * Responsibility
 * - GET /signout: clear cookies, then hand the browser to the provider logout
 * - Cookie domain and return target follow the application of the request host
 */
use axum::{extract::State, response::Response};

use crate::api::extractors::forwarded::ForwardedRequest;
use crate::api::response::decision_response;
use crate::error::AppError;
use crate::state::AppState;

pub async fn signout(
    State(state): State<AppState>,
    ForwardedRequest(ctx): ForwardedRequest,
) -> Result<Response, AppError> {
    decision_response(state.engine.signout(&ctx), state.engine.cookie_settings(ctx.host()))
}
