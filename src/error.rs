/*
 * Responsibility
 * - AppError shared by every handler
 * - IntoResponse (HTTP status / JSON error body)
 * - Map DenyReason onto 401 / 403 / 400 / 5xx
 */
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::services::auth::DenyReason;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Denied(DenyReason),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Denied(reason) => deny_status(reason),
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Denied(reason) => reason.code(),
            AppError::InvalidRequest(_) => "BAD_REQUEST",
            AppError::Internal => "INTERNAL",
        }
    }
}

fn deny_status(reason: &DenyReason) -> StatusCode {
    match reason {
        DenyReason::PolicyDenied(_) => StatusCode::FORBIDDEN,
        DenyReason::InvalidCallback(_) => StatusCode::BAD_REQUEST,
        DenyReason::NetworkError(_) => StatusCode::BAD_GATEWAY,
        DenyReason::Timeout => StatusCode::GATEWAY_TIMEOUT,
        DenyReason::KeysUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        DenyReason::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        DenyReason::MalformedToken
        | DenyReason::InvalidSignature
        | DenyReason::Expired
        | DenyReason::NotYetValid
        | DenyReason::IssuerMismatch
        | DenyReason::AudienceMismatch
        | DenyReason::MissingClaim(_)
        | DenyReason::StateMismatch(_)
        | DenyReason::ProviderRejected(_)
        | DenyReason::Unauthenticated => StatusCode::UNAUTHORIZED,
    }
}

impl From<DenyReason> for AppError {
    fn from(reason: DenyReason) -> Self {
        AppError::Denied(reason)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
            },
        };

        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_separate_auth_policy_and_upstream() {
        let status = |r: DenyReason| AppError::from(r).status();

        assert_eq!(status(DenyReason::Expired), StatusCode::UNAUTHORIZED);
        assert_eq!(status(DenyReason::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(status(DenyReason::PolicyDenied("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(
            status(DenyReason::InvalidCallback("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(DenyReason::NetworkError("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(status(DenyReason::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status(DenyReason::KeysUnavailable), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn body_carries_code_and_message() {
        let response = AppError::Denied(DenyReason::Timeout).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], "PROVIDER_TIMEOUT");
        assert_eq!(json["error"]["message"], "identity provider timed out");
    }
}
