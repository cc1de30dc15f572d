use std::env;
use std::str::FromStr;

pub enum EnvKey {
    Host,
    ServerPort,
    AllowedOrigin,
    FfmpegPath,
    UploadDir,
    UploadField,
    MaxUploadBytes,
    TranscodeTimeoutSecs,
    KillGraceSecs,
    AudioMode,
    VideoCodec,
    AudioCodec,
    Crf,
    Preset,
    DownloadFilename,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::Host => "HOST",
            EnvKey::ServerPort => "PORT",
            EnvKey::AllowedOrigin => "ALLOWED_ORIGIN",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::UploadDir => "UPLOAD_DIR",
            EnvKey::UploadField => "UPLOAD_FIELD",
            EnvKey::MaxUploadBytes => "MAX_UPLOAD_BYTES",
            EnvKey::TranscodeTimeoutSecs => "TRANSCODE_TIMEOUT_SECS",
            EnvKey::KillGraceSecs => "TRANSCODE_KILL_GRACE_SECS",
            EnvKey::AudioMode => "AUDIO_MODE",
            EnvKey::VideoCodec => "VIDEO_CODEC",
            EnvKey::AudioCodec => "AUDIO_CODEC",
            EnvKey::Crf => "CRF",
            EnvKey::Preset => "PRESET",
            EnvKey::DownloadFilename => "DOWNLOAD_FILENAME",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
