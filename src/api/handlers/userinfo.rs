/*
 * Responsibility
 * - GET /userinfo: identity behind the session cookie, or 401
 */
use axum::{Json, extract::State};

use crate::api::dto::userinfo::UserinfoResponse;
use crate::api::extractors::forwarded::ForwardedRequest;
use crate::error::AppError;
use crate::state::AppState;

pub async fn userinfo(
    State(state): State<AppState>,
    ForwardedRequest(ctx): ForwardedRequest,
) -> Result<Json<UserinfoResponse>, AppError> {
    let identity = state.engine.userinfo(&ctx)?;
    Ok(Json(identity.into()))
}
