/*
 * Responsibility
 * - GET /signin: provider callback (code exchange, session cookie, redirect back)
 */
use axum::{
    extract::{Query, State},
    response::Response,
};

use crate::api::dto::signin::SigninQuery;
use crate::api::extractors::forwarded::ForwardedRequest;
use crate::api::response::decision_response;
use crate::error::AppError;
use crate::state::AppState;

pub async fn signin(
    State(state): State<AppState>,
    ForwardedRequest(ctx): ForwardedRequest,
    Query(query): Query<SigninQuery>,
) -> Result<Response, AppError> {
    let decision = state.engine.callback(&ctx, &query.into()).await;
    decision_response(decision, state.engine.cookie_settings(ctx.host()))
}
