//! External transcoding engine boundary.
//!
//! The orchestrator only sees [`TranscodeEngine`] and the [`JobHandle`] it
//! returns; command-line construction and process handling stay behind it.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod ffmpeg;
pub mod job;
pub mod progress;

pub use ffmpeg::FfmpegEngine;
pub use job::{AudioMode, MAX_TIMEOUT, TranscodeJob, TranscodeProfile};
pub use progress::TranscodeProgress;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transcoding engine `{program}` is not available")]
    Unavailable { program: String },

    #[error("failed to start transcoding engine: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Lifecycle notifications emitted by a running job.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Started { command_line: String },
    Progress(TranscodeProgress),
    Completed,
    Failed { message: String },
}

impl EngineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineEvent::Completed | EngineEvent::Failed { .. })
    }
}

#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    /// Human readable engine name, for logs and health output.
    fn name(&self) -> &str;

    /// Location of the engine executable, if it can be found.
    fn resolve(&self) -> Option<PathBuf>;

    /// First line of the engine's version banner.
    async fn version(&self) -> Option<String>;

    /// Start `job`. Must be called from within a tokio runtime.
    fn launch(&self, job: &TranscodeJob) -> Result<JobHandle, EngineError>;
}

/// Handle to one running engine invocation.
///
/// Dropping the handle cancels the job.
pub struct JobHandle {
    events: mpsc::UnboundedReceiver<EngineEvent>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl JobHandle {
    /// `driver` must emit events on the channel and stop the underlying work
    /// once `cancel` fires.
    pub fn new(
        events: mpsc::UnboundedReceiver<EngineEvent>,
        cancel: CancellationToken,
        driver: JoinHandle<()>,
    ) -> Self {
        Self {
            events,
            cancel,
            driver: Some(driver),
        }
    }

    /// Next lifecycle event, or `None` once the driver has gone away.
    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        self.events.recv().await
    }

    /// Stop the job and wait until the engine is gone.
    pub async fn cancel(mut self) {
        self.cancel.cancel();
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                tracing::warn!("engine driver ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
