use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::problem::ProblemDetails;
use crate::services::MessagingError;

pub type AppResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_failed", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

/// HTTP status for a messaging failure.
pub fn status_for(err: &MessagingError) -> StatusCode {
    match err {
        MessagingError::NotFound(_) => StatusCode::NOT_FOUND,
        MessagingError::Validation(_) => StatusCode::BAD_REQUEST,
        MessagingError::Forbidden(_) => StatusCode::FORBIDDEN,
        MessagingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        MessagingError::Provider(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let mut problem = ProblemDetails::new(self.status, self.code, self.message);
        if let Some(details) = self.details {
            problem = problem.with_details(details);
        }

        problem.into_response()
    }
}

impl From<MessagingError> for ApiError {
    fn from(err: MessagingError) -> Self {
        Self::new(status_for(&err), err.code(), err.message())
    }
}

impl From<http::Error> for ApiError {
    fn from(err: http::Error) -> Self {
        Self::internal_server_error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn into_response_serializes_problem_details() {
        let response = ApiError::not_found("missing thread")
            .with_details(json!({ "thread": "t-1" }))
            .into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );

        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .expect("body to bytes");
        let json: Value =
            serde_json::from_slice(&bytes).expect("problem details deserializes to json");
        assert_eq!(json["code"], "not_found");
        assert_eq!(json["message"], "missing thread");
        assert_eq!(json["details"]["thread"], "t-1");
    }

    #[test]
    fn messaging_errors_map_to_matching_status_codes() {
        let cases = [
            (MessagingError::NotFound("x".into()), StatusCode::NOT_FOUND, "not_found"),
            (
                MessagingError::Validation("x".into()),
                StatusCode::BAD_REQUEST,
                "validation_failed",
            ),
            (MessagingError::Forbidden("x".into()), StatusCode::FORBIDDEN, "forbidden"),
            (
                MessagingError::Storage("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_fault",
            ),
            (
                MessagingError::Provider("x".into()),
                StatusCode::BAD_GATEWAY,
                "provider_fault",
            ),
        ];

        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status(), status);
            assert_eq!(api.code(), code);
        }
    }
}
