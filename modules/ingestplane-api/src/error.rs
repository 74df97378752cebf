use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use ingestplane_common::RepoError;
use serde_json::json;

/// Wraps `RepoError` so it can implement `IntoResponse` (the orphan rule
/// blocks implementing it directly on a type from `ingestplane-common`).
/// One central mapping from error kind to HTTP status, the way
/// `rootsignal-api` centralizes its own error → response conversion.
pub struct ApiError(pub RepoError);

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RepoError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RepoError::NotFound(_) => StatusCode::NOT_FOUND,
            RepoError::Conflict(_) => StatusCode::CONFLICT,
            RepoError::Forbidden(_) => StatusCode::FORBIDDEN,
            RepoError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RepoError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RepoError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if matches!(self.0, RepoError::Internal(_)) {
            tracing::error!(error = %self.0, "internal error");
        }
        (status, Json(json!({"kind": self.0.kind(), "message": self.0.to_string()}))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
