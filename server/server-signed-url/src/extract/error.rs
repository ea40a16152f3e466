use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

#[derive(Debug)]
pub enum AppError {
    BadRequest(&'static str),
    EncodeResponse(serde_json::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason).into_response(),
            AppError::EncodeResponse(e) => {
                error!("failed to encode response: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to encode response",
                )
                    .into_response()
            }
        }
    }
}
