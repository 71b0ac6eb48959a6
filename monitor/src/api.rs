// ---------------------------------------------------------------------------
// HTTP API over the monitor facade
// ---------------------------------------------------------------------------

use crate::monitor::{FilterResult, HostView, Monitor, ScanRequest};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use host_store::query::PortGroup;
use host_store::FilterRequest;
use monitor_core::{MonitorError, PortKey};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        match e {
            MonitorError::UnknownHost(_) => ApiError::NotFound(e.to_string()),
            MonitorError::InvalidDirectory { .. }
            | MonitorError::InvalidScanRequest(_)
            | MonitorError::InvalidPortKey(_)
            | MonitorError::MalformedHost { .. } => ApiError::BadRequest(e.to_string()),
            MonitorError::Decode { .. } | MonitorError::IncompleteReport(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_key, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Internal(msg) => {
                tracing::error!(details = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal server error".to_string())
            }
        };
        (status, Json(ApiErrorBody { error: error_key.into(), message })).into_response()
    }
}

type AppState = Arc<Monitor>;

pub fn build_router(monitor: AppState) -> Router {
    Router::new()
        .route("/api/system/health", get(health_check))
        .route("/api/scan-results", get(scan_results))
        .route("/api/ports", get(ports))
        .route("/api/services", get(services))
        .route("/api/groups", get(groups))
        .route("/api/filter", post(filter))
        .route("/api/export/{protocol}/{port}", get(export))
        .route("/api/watch", post(watch))
        .route("/api/watch-directory", get(watch_directory))
        .route("/api/execute-scan", post(execute_scan))
        .layer(CorsLayer::permissive())
        .with_state(monitor)
}

pub async fn serve(monitor: AppState, listen: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(monitor);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(%listen, "api listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    tracing::info!("api server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn scan_results(State(m): State<AppState>) -> Json<Vec<HostView>> {
    Json(m.host_views())
}

async fn ports(State(m): State<AppState>) -> Json<Vec<String>> {
    Json(m.available_ports())
}

async fn services(State(m): State<AppState>) -> Json<Vec<String>> {
    Json(m.available_services())
}

async fn groups(State(m): State<AppState>) -> Json<Vec<PortGroup>> {
    Json(m.groups())
}

async fn filter(State(m): State<AppState>, Json(req): Json<FilterRequest>) -> Json<FilterResult> {
    Json(m.filter(&req))
}

async fn export(State(m): State<AppState>, Path((protocol, port)): Path<(String, String)>) -> Result<Response, ApiError> {
    let key: PortKey = format!("{protocol}/{port}").parse()?;
    let (name, body) = m.export_group(&key).ok_or_else(|| ApiError::NotFound(format!("no hosts with {key} open")))?;
    let disposition = format!("attachment; filename=\"{name}\"");
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()), (header::CONTENT_DISPOSITION, disposition)], body)
        .into_response())
}

#[derive(Debug, Deserialize)]
struct WatchRequest {
    directory: Option<String>,
}

#[derive(Debug, Serialize)]
struct WatchResponse {
    success: bool,
    directory: PathBuf,
}

async fn watch(State(m): State<AppState>, Json(req): Json<WatchRequest>) -> Result<Json<WatchResponse>, ApiError> {
    let dir = req
        .directory
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("invalid directory path provided".into()))?;
    let directory = m.set_watched_directory(std::path::Path::new(&dir))?;
    Ok(Json(WatchResponse { success: true, directory }))
}

#[derive(Debug, Serialize)]
struct WatchDirectoryResponse {
    directory: Option<PathBuf>,
}

async fn watch_directory(State(m): State<AppState>) -> Json<WatchDirectoryResponse> {
    Json(WatchDirectoryResponse { directory: m.watched_directory() })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteScanRequest {
    host_address: String,
    #[serde(default)]
    ports: Vec<u16>,
}

async fn execute_scan(
    State(m): State<AppState>,
    Json(req): Json<ExecuteScanRequest>,
) -> Result<(StatusCode, Json<ScanRequest>), ApiError> {
    let request = m.request_service_scan(&req.host_address, &req.ports)?;
    Ok((StatusCode::ACCEPTED, Json(request)))
}
