use std::fmt::Debug;

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
};
use serde::de::DeserializeOwned;
use tracing::info;

use super::error::AppError;

pub const INVALID_PAYLOAD: &str = "Invalid request payload";

/// JSON request body. Decoded whatever the `content-type` header says, and
/// rejected with 400 before the handler runs when it does not fit `T`.
#[derive(Debug)]
pub struct JsonBodyRequest<T>(pub T)
where
    T: Debug + DeserializeOwned;

impl<T, S> FromRequest<S> for JsonBodyRequest<T>
where
    T: Debug + DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Ok(request_bytes) = Bytes::from_request(req, state).await else {
            return Err(AppError::BadRequest(INVALID_PAYLOAD));
        };

        serde_json::from_slice(&request_bytes)
            .map(JsonBodyRequest)
            .map_err(|e| {
                info!("invalid request payload: {e}");
                AppError::BadRequest(INVALID_PAYLOAD)
            })
    }
}
