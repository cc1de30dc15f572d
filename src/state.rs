use std::sync::Arc;

use crate::common::scratch::ScratchDir;
use crate::config::settings::AppConfig;
use crate::infrastructure::engine::TranscodeEngine;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub engine: Arc<dyn TranscodeEngine>,
    pub scratch: ScratchDir,
}

impl AppState {
    pub fn new(config: AppConfig, engine: Arc<dyn TranscodeEngine>, scratch: ScratchDir) -> Self {
        Self {
            config,
            engine,
            scratch,
        }
    }
}
