//! Scratch directory for in-flight uploads and transcoder output.

use std::io;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    /// Creates the directory (and parents) if it does not exist yet.
    pub async fn ensure(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        if !tokio::fs::try_exists(&root).await.unwrap_or(false) {
            tokio::fs::create_dir_all(&root).await?;
            info!("Created scratch directory {}", root.display());
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fresh path for an uploaded file. Only the extension of the client's
    /// file name is kept.
    pub fn input_path(&self, original_name: Option<&str>) -> PathBuf {
        let ext = original_name
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "bin".to_string());
        self.root.join(format!("input_{}.{}", Uuid::new_v4().simple(), ext))
    }

    /// Fresh output path. The timestamp keeps listings ordered, the UUID keeps
    /// concurrent requests apart.
    pub fn output_path(&self, extension: &str) -> PathBuf {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        self.root
            .join(format!("output_{}_{}.{}", millis, Uuid::new_v4().simple(), extension))
    }
}

/// Deletes every registered path when dropped.
///
/// One guard belongs to one request. Missing files are ignored and other
/// failures are only logged.
#[derive(Debug, Default)]
pub struct ScratchGuard {
    paths: Vec<PathBuf>,
}

impl ScratchGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed scratch file {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove scratch file {}: {}", path.display(), e),
            }
        }
    }
}
