//! CoreError → HTTP mapping. The taxonomy itself knows nothing about HTTP;
//! this boundary assigns statuses and redacts storage detail outside
//! development mode.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rgw_schemas::CoreError;
use serde::Serialize;
use tracing::error;

pub struct ApiError {
    pub error: CoreError,
    pub expose_detail: bool,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

pub(crate) fn status_for(error: &CoreError) -> StatusCode {
    match error {
        CoreError::Validation { .. } => StatusCode::BAD_REQUEST,
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::Authorization { .. } => StatusCode::FORBIDDEN,
        CoreError::BusinessLogic { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.error);

        let message = match &self.error {
            CoreError::Storage { .. } if !self.expose_detail => {
                error!(error = %self.error, "storage error surfaced to client (redacted)");
                "internal storage error".to_string()
            }
            other => other.to_string(),
        };

        (
            status,
            Json(ErrorBody {
                error: message,
                kind: self.error.kind(),
            }),
        )
            .into_response()
    }
}
