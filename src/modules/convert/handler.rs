use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, State, multipart::MultipartRejection},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use futures_util::Stream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use super::error::ConvertError;
use super::service::{ConvertService, TranscodedClip};
use crate::common::scratch::ScratchGuard;
use crate::common::upload::receive_clip;
use crate::state::AppState;

/// Convert an uploaded clip to MP4
/// Returns the converted file as an attachment
#[utoipa::path(
    post,
    path = "/convert",
    request_body(content = String, content_type = "multipart/form-data", description = "Single file field `video`"),
    responses(
        (status = 200, description = "Converted file", body = Vec<u8>, content_type = "video/mp4"),
        (status = 400, description = "No file provided", body = crate::common::response::ErrorBody),
        (status = 413, description = "Upload too large", body = crate::common::response::ErrorBody),
        (status = 415, description = "Not a video upload", body = crate::common::response::ErrorBody),
        (status = 500, description = "Engine unavailable, engine error, timeout or delivery failure", body = crate::common::response::ErrorBody)
    ),
    tag = "Convert"
)]
pub async fn convert(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ConvertError> {
    info!("POST /convert received");
    let mut multipart = multipart.map_err(|e| ConvertError::NoFileProvided(Some(e.body_text())))?;

    // Dropped on every early return, or moved into the response body.
    let mut guard = ScratchGuard::new();

    let clip = receive_clip(&mut multipart, &state.config.upload_field, &state.scratch, &mut guard).await?;

    let output = state.scratch.output_path(&state.config.transcode.container);
    guard.track(&output);

    let converted = ConvertService::transcode(&state, &clip, output).await?;

    info!("Sending file: {}", converted.path.display());
    deliver(converted, &state.config.download_filename, guard).await
}

async fn deliver(
    clip: TranscodedClip,
    download_name: &str,
    guard: ScratchGuard,
) -> Result<Response, ConvertError> {
    let file = File::open(&clip.path)
        .await
        .map_err(|e| ConvertError::Delivery(e.to_string()))?;

    let content_type = mime_guess::from_path(&clip.path).first_or_octet_stream();
    let body = Body::from_stream(DeliveryStream {
        inner: ReaderStream::new(file),
        sent: 0,
        expected: clip.size,
        finished: false,
        _guard: guard,
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CONTENT_LENGTH, clip.size)
        .header(header::CONTENT_DISPOSITION, content_disposition(download_name))
        .body(body)
        .map_err(|e| ConvertError::Delivery(e.to_string()))
}

/// `attachment` disposition. Non-ASCII names go into `filename*` with a plain
/// fallback for old clients.
pub fn content_disposition(filename: &str) -> HeaderValue {
    let plain = filename
        .chars()
        .all(|c| c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\'));

    let value = if plain {
        format!("attachment; filename=\"{}\"", filename)
    } else {
        let fallback = match Path::new(filename).extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.is_ascii() => format!("video.{}", ext),
            _ => "video".to_string(),
        };
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(filename)
        )
    };

    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Response body that owns the request's scratch files until the transfer
/// ends, however it ends.
struct DeliveryStream {
    inner: ReaderStream<File>,
    sent: u64,
    expected: u64,
    finished: bool,
    _guard: ScratchGuard,
}

impl Stream for DeliveryStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                error!("Error while sending file after {} bytes: {}", this.sent, e);
                this.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                if !this.finished {
                    info!("File sent successfully ({} bytes)", this.sent);
                }
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for DeliveryStream {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                "Client went away after {} of {} bytes",
                self.sent, self.expected
            );
        }
    }
}
