use std::fmt::Debug;

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::error::AppError;

/// A 200 response with `T` encoded as the JSON body.
#[derive(Debug)]
pub struct JsonResponse<T>(pub T)
where
    T: Debug + Serialize;

impl<T> JsonResponse<T>
where
    T: Debug + Serialize,
{
    pub fn new(body: T) -> Self {
        Self(body)
    }
}

impl<T> IntoResponse for JsonResponse<T>
where
    T: Debug + Serialize,
{
    fn into_response(self) -> Response {
        let body = match serde_json::to_vec(&self.0) {
            Ok(body) => body,
            Err(e) => return AppError::EncodeResponse(e).into_response(),
        };

        let mut response = Response::new(body.into());
        *response.status_mut() = StatusCode::OK;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}
