//! Parsing of FFmpeg's `-progress` key/value stream and stderr banner.

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranscodeProgress {
    pub frame: u64,
    pub fps: f64,
    pub out_time_ms: i64,
    pub speed: f64,
    /// Only known once the input duration has been read from stderr.
    pub percent: Option<f64>,
    pub is_complete: bool,
}

impl TranscodeProgress {
    fn update_percent(&mut self, duration_ms: Option<i64>) {
        self.percent = duration_ms
            .filter(|d| *d > 0)
            .map(|d| ((self.out_time_ms as f64 / d as f64) * 100.0).clamp(0.0, 100.0));
    }
}

/// Feed one stdout line into `current`. Returns a snapshot at the end of each
/// progress block (`progress=continue|end`).
pub fn parse_progress_line(
    line: &str,
    current: &mut TranscodeProgress,
    duration_ms: Option<i64>,
) -> Option<TranscodeProgress> {
    let (key, value) = line.trim().split_once('=')?;

    match key {
        "out_time_us" | "out_time_ms" => {
            // FFmpeg reports microseconds under both keys.
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = us / 1000;
            }
        }
        "frame" => {
            if let Ok(frame) = value.parse() {
                current.frame = frame;
            }
        }
        "fps" => {
            if let Ok(fps) = value.parse() {
                current.fps = fps;
            }
        }
        "speed" => {
            if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                current.speed = speed;
            }
        }
        "progress" => {
            if value == "end" {
                current.is_complete = true;
            }
            current.update_percent(duration_ms);
            return Some(current.clone());
        }
        _ => {}
    }

    None
}

/// Extract the input duration from a stderr line such as
/// `  Duration: 00:00:02.04, start: 0.000000, bitrate: 512 kb/s`.
pub fn parse_duration_line(line: &str) -> Option<i64> {
    let rest = line.trim_start().strip_prefix("Duration:")?;
    let stamp = rest.split(',').next()?.trim();
    parse_timestamp_ms(stamp)
}

fn parse_timestamp_ms(stamp: &str) -> Option<i64> {
    let mut parts = stamp.split(':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3_600_000 + minutes * 60_000 + (seconds * 1000.0).round() as i64)
}
