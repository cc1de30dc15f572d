use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::error::TranscodeError;
use crate::common::upload::UploadedClip;
use crate::infrastructure::engine::{EngineError, EngineEvent, TranscodeEngine, TranscodeJob};
use crate::state::AppState;

/// Output of a finished job, ready to be streamed.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodedClip {
    pub path: PathBuf,
    pub size: u64,
}

pub type TranscodeResult = Result<TranscodedClip, TranscodeError>;

pub struct ConvertService;

impl ConvertService {
    /// Transcode `clip` into `output` with the configured profile.
    pub async fn transcode(state: &AppState, clip: &UploadedClip, output: PathBuf) -> TranscodeResult {
        let engine = state.engine.as_ref();
        if engine.resolve().is_none() {
            warn!("{} executable could not be resolved", engine.name());
            return Err(TranscodeError::EngineUnavailable(engine.name().to_string()));
        }

        let job = TranscodeJob::new(&clip.path, output, state.config.transcode.clone());
        info!(
            "Converting {} -> {} (audio: {}, deadline {})",
            job.input.display(),
            job.output.display(),
            job.profile.audio_mode,
            job.deadline_at
        );

        run_job(engine, job).await
    }
}

enum Outcome {
    Completed,
    Failed(String),
    TimedOut,
}

/// Launch `job` and wait for the first terminal event or the deadline,
/// whichever comes first. Never relaunches.
pub async fn run_job(engine: &dyn TranscodeEngine, job: TranscodeJob) -> TranscodeResult {
    let mut handle = engine.launch(&job).map_err(|e| match e {
        EngineError::Unavailable { program } => TranscodeError::EngineUnavailable(program),
        EngineError::Spawn(e) => TranscodeError::EngineError(e.to_string()),
    })?;

    let deadline = tokio::time::sleep_until(job.deadline);
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            // A terminal event already queued beats a deadline firing in the same poll.
            biased;
            event = handle.next_event() => match event {
                Some(EngineEvent::Started { command_line }) => {
                    info!("FFmpeg command: {}", command_line);
                }
                Some(EngineEvent::Progress(progress)) => match progress.percent {
                    Some(percent) => debug!("Progress: {:.1}%", percent),
                    None => debug!("Progress: {} ms encoded", progress.out_time_ms),
                },
                Some(EngineEvent::Completed) => break Outcome::Completed,
                Some(EngineEvent::Failed { message }) => break Outcome::Failed(message),
                None => break Outcome::Failed("engine stopped without reporting a result".to_string()),
            },
            _ = &mut deadline => break Outcome::TimedOut,
        }
    };

    let result = match outcome {
        Outcome::Completed => match tokio::fs::metadata(&job.output).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                info!("Conversion finished: {} ({} bytes)", job.output.display(), meta.len());
                return Ok(TranscodedClip {
                    path: job.output,
                    size: meta.len(),
                });
            }
            _ => Err(TranscodeError::EngineError(
                "engine reported success but produced no output".to_string(),
            )),
        },
        Outcome::Failed(message) => {
            warn!("FFmpeg error: {}", message);
            Err(TranscodeError::EngineError(message))
        }
        Outcome::TimedOut => {
            warn!("FFmpeg timed out after {:?}, terminating", job.timeout());
            handle.cancel().await;
            Err(TranscodeError::Timeout(job.timeout()))
        }
    };

    discard_output(&job.output).await;
    result
}

/// Partial output must never reach a client.
async fn discard_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Discarded partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to discard partial output {}: {}", path.display(), e),
    }
}
