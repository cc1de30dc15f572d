use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    /// Whether the engine executable can be resolved.
    pub ffmpeg: bool,
    pub ffmpeg_path: Option<String>,
    pub ffmpeg_version: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InfoResponse {
    pub message: String,
}
