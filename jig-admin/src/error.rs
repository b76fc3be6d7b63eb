use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use jig_core::JigError;

/// `JigError` rendered as `{"error": ..., "status": ...}`.
#[derive(Debug)]
pub struct ApiError(pub JigError);

impl From<JigError> for ApiError {
    fn from(err: JigError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, status = status.as_u16(), "request rejected");
        }
        (status, Json(self.0.to_json())).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
