use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;

/// What to do with the source audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioMode {
    /// Re-encode the first audio stream if the input has one.
    Preserve,
    /// Drop audio entirely. Canvas recordings never carry a track.
    Strip,
}

impl FromStr for AudioMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preserve" | "keep" | "aac" => Ok(AudioMode::Preserve),
            "strip" | "none" | "an" => Ok(AudioMode::Strip),
            other => Err(format!("expected `preserve` or `strip`, got `{other}`")),
        }
    }
}

impl fmt::Display for AudioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioMode::Preserve => f.write_str("preserve"),
            AudioMode::Strip => f.write_str("strip"),
        }
    }
}

/// Encoding settings shared by every job of this process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeProfile {
    pub video_codec: String,
    pub audio_codec: String,
    pub audio_mode: AudioMode,
    /// Muxer name passed to `-f`, also used as the output file extension.
    pub container: String,
    pub crf: u8,
    pub preset: String,
    pub timeout: Duration,
    /// How long a terminated engine gets to exit before it is killed.
    pub kill_grace: Duration,
}

impl Default for TranscodeProfile {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            audio_mode: AudioMode::Strip,
            container: "mp4".to_string(),
            crf: 23,
            preset: "fast".to_string(),
            timeout: Duration::from_secs(30),
            kill_grace: Duration::from_secs(5),
        }
    }
}

/// Longest deadline a job will accept. Larger timeouts are clamped to it.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// A single engine invocation. Lives for exactly one request.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub profile: TranscodeProfile,
    pub deadline: Instant,
    /// Wall-clock view of `deadline`, for logs.
    pub deadline_at: OffsetDateTime,
}

impl TranscodeJob {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>, profile: TranscodeProfile) -> Self {
        let budget = profile.timeout.min(MAX_TIMEOUT);
        let deadline = Instant::now() + budget;
        let deadline_at = OffsetDateTime::now_utc() + budget;
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            profile,
            deadline,
            deadline_at,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.profile.timeout.min(MAX_TIMEOUT)
    }

    /// Engine arguments, excluding the program itself.
    pub fn build_args(&self) -> Vec<String> {
        let p = &self.profile;
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-y".into(),
            "-nostats".into(),
            "-progress".into(),
            "pipe:1".into(),
            "-i".into(),
            self.input.to_string_lossy().into_owned(),
            "-c:v".into(),
            p.video_codec.clone(),
        ];

        match p.audio_mode {
            AudioMode::Strip => args.push("-an".into()),
            AudioMode::Preserve => {
                // `0:a?` keeps silent sources from failing the mapping.
                args.extend(
                    ["-map", "0:v:0", "-map", "0:a?", "-c:a", p.audio_codec.as_str()]
                        .into_iter()
                        .map(String::from),
                );
            }
        }

        args.extend([
            "-f".into(),
            p.container.clone(),
            "-crf".into(),
            p.crf.to_string(),
            "-preset".into(),
            p.preset.clone(),
        ]);

        // Index first, so browsers can start playback before the download ends.
        if p.container == "mp4" {
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        }

        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(mode: AudioMode) -> TranscodeJob {
        let profile = TranscodeProfile {
            audio_mode: mode,
            ..TranscodeProfile::default()
        };
        TranscodeJob::new("uploads/input.webm", "uploads/output.mp4", profile)
    }

    #[test]
    fn strip_mode_drops_audio() {
        let args = job(AudioMode::Strip).build_args();
        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"-c:a".to_string()));
    }

    #[test]
    fn preserve_mode_maps_optional_audio() {
        let args = job(AudioMode::Preserve).build_args();
        assert!(!args.contains(&"-an".to_string()));
        let pos = args.iter().position(|a| a == "-c:a").unwrap();
        assert_eq!(args[pos + 1], "aac");
        assert!(args.contains(&"0:a?".to_string()));
    }

    #[test]
    fn input_precedes_codecs_and_output_is_last() {
        let args = job(AudioMode::Strip).build_args();
        let input = args.iter().position(|a| a == "-i").unwrap();
        let codec = args.iter().position(|a| a == "-c:v").unwrap();
        assert_eq!(args[input + 1], "uploads/input.webm");
        assert!(input < codec);
        assert_eq!(args[codec + 1], "libx264");
        assert_eq!(args.last().unwrap(), "uploads/output.mp4");

        let crf = args.iter().position(|a| a == "-crf").unwrap();
        assert_eq!(args[crf + 1], "23");
        let preset = args.iter().position(|a| a == "-preset").unwrap();
        assert_eq!(args[preset + 1], "fast");
        let format = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[format + 1], "mp4");
    }

    #[test]
    fn audio_mode_parses_aliases() {
        assert_eq!("Preserve".parse::<AudioMode>().unwrap(), AudioMode::Preserve);
        assert_eq!(" strip ".parse::<AudioMode>().unwrap(), AudioMode::Strip);
        assert!("loud".parse::<AudioMode>().is_err());
    }

    #[tokio::test]
    async fn deadline_is_derived_from_timeout() {
        let before = Instant::now();
        let job = job(AudioMode::Strip);
        assert!(job.deadline >= before + Duration::from_secs(30));
        assert_eq!(job.timeout(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn oversized_timeout_is_clamped() {
        let profile = TranscodeProfile {
            timeout: Duration::from_secs(u64::MAX),
            ..TranscodeProfile::default()
        };
        let before = Instant::now();
        let job = TranscodeJob::new("uploads/input.webm", "uploads/output.mp4", profile);
        assert!(job.deadline <= Instant::now() + MAX_TIMEOUT);
        assert!(job.deadline >= before + MAX_TIMEOUT);
    }
}
