use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::post;

use crate::state::AppState;

pub mod error;
pub mod handler;
pub mod service;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/convert", post(handler::convert))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
}
