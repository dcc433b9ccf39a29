use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::service::{
    parse_batch, parse_single, BatchResponse, ClusterAssignment, ModelInfo, ServiceContext, ServiceError,
};

type SharedContext = Arc<ServiceContext>;

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "request rejected");
        (StatusCode::BAD_REQUEST, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

pub fn router(context: SharedContext) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/predict-batch", post(predict_batch))
        .route("/info", get(info))
        .with_state(context)
}

async fn home(State(context): State<SharedContext>) -> Json<serde_json::Value> {
    Json(context.metadata())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "ready": true }))
}

async fn predict(
    State(context): State<SharedContext>,
    body: Bytes,
) -> Result<Json<ClusterAssignment>, ServiceError> {
    let data = parse_single(&body)?;
    let assignment = context.predict_one(&data)?;
    tracing::debug!(cluster = assignment.cluster, "single prediction");
    Ok(Json(assignment))
}

async fn predict_batch(
    State(context): State<SharedContext>,
    body: Bytes,
) -> Result<Json<BatchResponse>, ServiceError> {
    let items = parse_batch(&body)?;
    let response = context.predict_batch(&items)?;
    tracing::debug!(total = response.total, summary = ?response.summary, "batch prediction");
    Ok(Json(response))
}

async fn info(State(context): State<SharedContext>) -> Json<ModelInfo> {
    Json(context.info())
}

pub async fn serve(context: SharedContext, host: &str, port: u16) -> Result<()> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;
    serve_on(context, listener).await
}

pub async fn serve_on(context: SharedContext, listener: TcpListener) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, source = context.source(), "listening");
    axum::serve(listener, router(context))
        .await
        .context("HTTP server failed")?;
    Ok(())
}
