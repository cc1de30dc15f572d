use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use super::dto::{HealthResponse, InfoResponse};
use crate::common::response::ApiSuccess;
use crate::state::AppState;

const UNKNOWN_VERSION: &str = "FFmpeg version unknown";

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service status", body = HealthResponse)
    ),
    tag = "System"
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    info!("Health-check request received");

    let engine = state.engine.as_ref();
    let path = engine.resolve();
    let version = match path {
        Some(_) => engine.version().await,
        None => None,
    };

    ApiSuccess(
        HealthResponse {
            status: "OK".to_string(),
            message: "Server is running".to_string(),
            ffmpeg: path.is_some(),
            ffmpeg_path: path.map(|p| p.display().to_string()),
            ffmpeg_version: version.unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
        },
        StatusCode::OK,
    )
}

#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service description", body = InfoResponse)
    ),
    tag = "System"
)]
pub async fn index() -> impl IntoResponse {
    info!("Root request received");
    ApiSuccess(
        InfoResponse {
            message: "Ticker video server. Use POST /convert to convert a WebM clip to MP4.".to_string(),
        },
        StatusCode::OK,
    )
}
