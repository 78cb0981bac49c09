use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use stackly_core::StatusRejection;

/// Errors surfaced to HTTP callers. Bodies are `{"detail": ..}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// A presence guard refused the change.
    #[error("{0}")]
    Rejected(StatusRejection),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Rejected(_) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            Self::Rejected(reason) => json!({ "detail": self.to_string(), "code": reason.code() }),
            _ => json!({ "detail": self.to_string() }),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_maps_to_conflict_with_reason() {
        let err = ApiError::Rejected(StatusRejection::DoNotDisturb);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "cannot override do-not-disturb");
    }

    #[test]
    fn bad_request_and_not_found() {
        assert_eq!(
            ApiError::BadRequest("Invalid status".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("User not found".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
