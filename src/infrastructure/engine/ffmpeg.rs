//! FFmpeg-backed [`TranscodeEngine`].

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::progress::{TranscodeProgress, parse_duration_line, parse_progress_line};
use super::{EngineError, EngineEvent, JobHandle, TranscodeEngine, TranscodeJob};

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const STDERR_TAIL_LINES: usize = 8;
/// Upper bound on reading leftover output once the process has exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    program: String,
}

impl FfmpegEngine {
    /// `program` is either a path to the binary or a name looked up on `PATH`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn resolve(&self) -> Option<PathBuf> {
        which::which(&self.program).ok()
    }

    async fn version(&self) -> Option<String> {
        let path = self.resolve()?;
        let output = tokio::time::timeout(
            VERSION_PROBE_TIMEOUT,
            Command::new(path)
                .arg("-version")
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .ok()?
        .ok()?;

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
    }

    fn launch(&self, job: &TranscodeJob) -> Result<JobHandle, EngineError> {
        let program = self.resolve().ok_or_else(|| EngineError::Unavailable {
            program: self.program.clone(),
        })?;

        let args = job.build_args();
        let command_line = format!("{} {}", program.display(), args.join(" "));

        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let _ = tx.send(EngineEvent::Started { command_line });
        let driver = tokio::spawn(drive(
            child,
            tx,
            cancel.clone(),
            job.profile.kill_grace,
            job.output.clone(),
        ));

        Ok(JobHandle::new(rx, cancel, driver))
    }
}

enum Exit {
    Status(std::io::Result<ExitStatus>),
    Cancelled,
}

/// Pumps the child's output into events until it exits or `cancel` fires.
async fn drive(
    mut child: Child,
    tx: mpsc::UnboundedSender<EngineEvent>,
    cancel: CancellationToken,
    grace: Duration,
    output: PathBuf,
) {
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        terminate(&mut child, grace).await;
        let _ = tx.send(EngineEvent::Failed {
            message: "engine output was not captured".to_string(),
        });
        return;
    };

    let mut stdout = BufReader::new(stdout).lines();
    let mut stderr = BufReader::new(stderr).lines();
    let mut stdout_open = true;
    let mut stderr_open = true;

    let mut progress = TranscodeProgress::default();
    let mut duration_ms: Option<i64> = None;
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    let exit = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Exit::Cancelled,
            status = child.wait() => break Exit::Status(status),
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => {
                    if let Some(snapshot) = parse_progress_line(&line, &mut progress, duration_ms) {
                        let _ = tx.send(EngineEvent::Progress(snapshot));
                    }
                }
                _ => stdout_open = false,
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => record_stderr(line, &mut tail, &mut duration_ms),
                _ => stderr_open = false,
            },
        }
    };

    if let Exit::Status(_) = exit {
        // Whatever the process wrote before exiting is still buffered in the pipes.
        let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
            while stdout_open {
                match stdout.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(snapshot) = parse_progress_line(&line, &mut progress, duration_ms) {
                            let _ = tx.send(EngineEvent::Progress(snapshot));
                        }
                    }
                    _ => stdout_open = false,
                }
            }
            while stderr_open {
                match stderr.next_line().await {
                    Ok(Some(line)) => record_stderr(line, &mut tail, &mut duration_ms),
                    _ => stderr_open = false,
                }
            }
        })
        .await;
    }

    let terminal = match exit {
        Exit::Cancelled => {
            terminate(&mut child, grace).await;
            // The request may already be gone, so nobody else will collect this.
            remove_abandoned_output(&output).await;
            return;
        }
        Exit::Status(Ok(status)) if status.success() => EngineEvent::Completed,
        Exit::Status(Ok(status)) => EngineEvent::Failed {
            message: failure_message(status, &tail),
        },
        Exit::Status(Err(e)) => EngineEvent::Failed {
            message: format!("failed to wait for engine: {}", e),
        },
    };
    let _ = tx.send(terminal);
}

async fn remove_abandoned_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("removed output of cancelled job {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove output of cancelled job {}: {}", path.display(), e),
    }
}

fn record_stderr(line: String, tail: &mut VecDeque<String>, duration_ms: &mut Option<i64>) {
    if duration_ms.is_none() {
        *duration_ms = parse_duration_line(&line);
    }
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line.to_string());
}

fn failure_message(status: ExitStatus, tail: &VecDeque<String>) -> String {
    let exit = match status.code() {
        Some(code) => format!("engine exited with code {}", code),
        None => "engine was terminated by a signal".to_string(),
    };
    match tail.back() {
        Some(last) => format!("{}: {}", exit, last),
        None => exit,
    }
}

/// SIGTERM first, SIGKILL once `grace` runs out.
async fn terminate(child: &mut Child, grace: Duration) {
    if request_exit(child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("engine stopped after termination request: {}", status);
                return;
            }
            Ok(Err(e)) => warn!("failed to wait for terminated engine: {}", e),
            Err(_) => warn!("engine ignored termination request for {:?}, killing", grace),
        }
    }

    if let Err(e) = child.kill().await {
        debug!("engine kill: {}", e);
    }
}

#[cfg(unix)]
fn request_exit(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: `pid` is our own un-reaped child, so it cannot have been recycled.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn request_exit(_child: &Child) -> bool {
    false
}
