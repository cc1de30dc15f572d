use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::config::env::{self, EnvKey};
use crate::infrastructure::engine::{AudioMode, MAX_TIMEOUT, TranscodeProfile};

pub const DEFAULT_ALLOWED_ORIGIN: &str = "https://lenta-kohl.vercel.app";
pub const DEFAULT_DOWNLOAD_FILENAME: &str = "бегущая_строка.mp4";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub server_port: u16,
    /// `*` allows any origin.
    pub allowed_origin: String,
    /// Absolute path, relative path, or a program name looked up on `PATH`.
    pub ffmpeg_path: String,
    pub upload_dir: PathBuf,
    pub upload_field: String,
    pub max_upload_bytes: usize,
    pub download_filename: String,
    pub transcode: TranscodeProfile,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            server_port: 10000,
            allowed_origin: DEFAULT_ALLOWED_ORIGIN.to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            upload_dir: PathBuf::from("uploads"),
            upload_field: "video".to_string(),
            max_upload_bytes: 100 * 1024 * 1024,
            download_filename: DEFAULT_DOWNLOAD_FILENAME.to_string(),
            transcode: TranscodeProfile::default(),
        }
    }
}

impl AppConfig {
    /// Reads the configuration from the process environment, falling back to
    /// [`AppConfig::default`] for anything unset.
    pub fn new() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let profile = defaults.transcode.clone();

        let audio_mode = match env::get(EnvKey::AudioMode) {
            Ok(raw) => raw.parse::<AudioMode>().map_err(|reason| ConfigError::Invalid {
                key: EnvKey::AudioMode.as_str(),
                value: raw.clone(),
                reason,
            })?,
            Err(_) => profile.audio_mode,
        };

        let timeout_secs = env::get_parsed(EnvKey::TranscodeTimeoutSecs, profile.timeout.as_secs());
        if timeout_secs == 0 || timeout_secs > MAX_TIMEOUT.as_secs() {
            return Err(ConfigError::Invalid {
                key: EnvKey::TranscodeTimeoutSecs.as_str(),
                value: timeout_secs.to_string(),
                reason: format!("timeout must be between 1 and {} seconds", MAX_TIMEOUT.as_secs()),
            });
        }
        let grace_secs = env::get_parsed(EnvKey::KillGraceSecs, profile.kill_grace.as_secs());
        if grace_secs > MAX_TIMEOUT.as_secs() {
            return Err(ConfigError::Invalid {
                key: EnvKey::KillGraceSecs.as_str(),
                value: grace_secs.to_string(),
                reason: format!("grace period must not exceed {} seconds", MAX_TIMEOUT.as_secs()),
            });
        }

        Ok(Self {
            host: env::get_or(EnvKey::Host, &defaults.host),
            server_port: env::get_parsed(EnvKey::ServerPort, defaults.server_port),
            allowed_origin: env::get_or(EnvKey::AllowedOrigin, &defaults.allowed_origin),
            ffmpeg_path: env::get_or(EnvKey::FfmpegPath, &defaults.ffmpeg_path),
            upload_dir: PathBuf::from(env::get_or(
                EnvKey::UploadDir,
                &defaults.upload_dir.to_string_lossy(),
            )),
            upload_field: env::get_or(EnvKey::UploadField, &defaults.upload_field),
            max_upload_bytes: env::get_parsed(EnvKey::MaxUploadBytes, defaults.max_upload_bytes),
            download_filename: env::get_or(EnvKey::DownloadFilename, &defaults.download_filename),
            transcode: TranscodeProfile {
                video_codec: env::get_or(EnvKey::VideoCodec, &profile.video_codec),
                audio_codec: env::get_or(EnvKey::AudioCodec, &profile.audio_codec),
                audio_mode,
                container: profile.container,
                crf: env::get_parsed(EnvKey::Crf, profile.crf),
                preset: env::get_or(EnvKey::Preset, &profile.preset),
                timeout: Duration::from_secs(timeout_secs),
                kill_grace: Duration::from_secs(grace_secs),
            },
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.server_port)
    }
}
