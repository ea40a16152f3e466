use axum::Extension;
use tracing::info;

use crate::{
    extract::{error::AppError, json_body::JsonBodyRequest, response::JsonResponse},
    model::signed_url::{GenerateSignedUrlsRequest, GenerateSignedUrlsResponse},
    service::issuer::BatchIssuer,
};

#[axum::debug_handler]
pub async fn generate_signed_urls(
    Extension(issuer): Extension<BatchIssuer>,
    JsonBodyRequest(req): JsonBodyRequest<GenerateSignedUrlsRequest>,
) -> Result<JsonResponse<GenerateSignedUrlsResponse>, AppError> {
    let request = req.into_issuance_request();
    info!("generate signed urls for {} files", request.len());

    let response = issuer.issue(request).await;

    Ok(JsonResponse::new(response.into()))
}
