/*
 * Responsibility
 * - URL layout of the service
 * - /authorize and /health face the proxy; /signin, /signout, /userinfo face browsers
 */
use axum::{
    Router,
    routing::{any, get},
};

use crate::api::handlers::{
    authorize::authorize, health::health, signin::signin, signout::signout, userinfo::userinfo,
};
use crate::middleware::security_headers;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    let browser = Router::new()
        .route("/signin", get(signin))
        .route("/signout", get(signout).post(signout))
        .route("/userinfo", get(userinfo));

    Router::new()
        .route("/authorize", any(authorize))
        .route("/health", get(health))
        .merge(security_headers::apply(browser))
}
