use std::path::{Path, PathBuf};

use axum::extract::{Multipart, multipart::Field};
use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use crate::common::scratch::{ScratchDir, ScratchGuard};
use crate::modules::convert::error::ConvertError;

/// A client upload persisted to the scratch directory.
#[derive(Debug, Clone)]
pub struct UploadedClip {
    pub path: PathBuf,
    pub field_name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: u64,
}

/// Browsers label blobs without a type as octet-stream.
pub fn is_accepted_content_type(content_type: &str) -> bool {
    match content_type.parse::<mime::Mime>() {
        Ok(m) => m.type_() == mime::VIDEO || m == mime::APPLICATION_OCTET_STREAM,
        Err(_) => false,
    }
}

/// Streams the `field_name` part of `multipart` into a fresh scratch file.
///
/// The file is registered with `guard` before it is created. Other parts are
/// skipped.
pub async fn receive_clip(
    multipart: &mut Multipart,
    field_name: &str,
    scratch: &ScratchDir,
    guard: &mut ScratchGuard,
) -> Result<UploadedClip, ConvertError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(field_name) {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        if let Some(ct) = content_type.as_deref() {
            if !is_accepted_content_type(ct) {
                return Err(ConvertError::UnsupportedMediaType(ct.to_string()));
            }
        }

        let path = scratch.input_path(file_name.as_deref());
        guard.track(&path);

        let size = stream_to_file(field, &path).await?;
        if size == 0 {
            return Err(ConvertError::NoFileProvided(Some(
                "uploaded file is empty".to_string(),
            )));
        }

        info!(
            "Received upload {:?} ({} bytes, {}) -> {}",
            file_name.as_deref().unwrap_or("<unnamed>"),
            size,
            content_type.as_deref().unwrap_or("no content type"),
            path.display()
        );

        return Ok(UploadedClip {
            path,
            field_name: field_name.to_string(),
            file_name,
            content_type,
            size,
        });
    }

    Err(ConvertError::NoFileProvided(None))
}

async fn stream_to_file(mut field: Field<'_>, path: &Path) -> Result<u64, ConvertError> {
    let mut file = File::create(path).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = field.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                error!("Upload stream error: {}", e);
                return Err(e.into());
            }
        };
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(written)
}
