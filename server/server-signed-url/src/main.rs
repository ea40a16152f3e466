use std::sync::Arc;

use axum::{routing::post, Extension, Router};
use config::ServiceConfig;
use server_common::external_api::gcs::storage::GcsClient;
use service::{issuer::BatchIssuer, signer::GcsSigner};
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod config;
pub mod extract;
pub mod handler;
pub mod model;
pub mod service;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    match dotenvy::dotenv() {
        Ok(path) => info!("loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => panic!("failed to load .env file: {e}"),
    }

    let config = ServiceConfig::from_env().expect("invalid service config");
    let gcs_client = GcsClient::from_env().expect("initialize storage signer failed");
    let issuer = BatchIssuer::new(Arc::new(GcsSigner::new(gcs_client)), config.limits);

    info!("starting service on {}, limits: {:?}", config.bind_addr, config.limits);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("failed to bind listener");
    axum::serve(listener, router(issuer))
        .await
        .expect("failed to start server");

    unreachable!("service exited unexpectedly");
}

pub fn router(issuer: BatchIssuer) -> Router {
    Router::new()
        .route(
            "/generate-signed-urls",
            post(handler::signed_url::generate_signed_urls),
        )
        .layer(Extension(issuer))
        .layer(TraceLayer::new_for_http())
}
