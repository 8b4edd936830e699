//! Per-file duration limits for the finished output directory

use crate::error::{ValidateError, Violation};
use crate::library::{audio_files, display_name};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Durations of every checked file
#[derive(Debug, Clone, Default)]
pub struct DurationReport {
    pub files: Vec<(String, f64)>,
    pub total_seconds: f64,
}

impl DurationReport {
    /// Aggregate length as `MM:SS`, or `HH:MM:SS` from one hour up
    pub fn total_display(&self) -> String {
        format_duration(self.total_seconds)
    }
}

#[derive(Debug)]
pub struct Validator {
    ffmpeg_path: PathBuf,
    ffprobe_path: Option<PathBuf>,
    extension: String,
}

impl Validator {
    pub fn new(ffmpeg_path: PathBuf, ffprobe_path: Option<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
            extension: extension.into(),
        }
    }

    /// Probe every audio file in `dir` and check it against `max_minutes`.
    ///
    /// All files are probed before judging, so the error lists every offender.
    pub async fn validate(&self, dir: &Path, max_minutes: u32) -> Result<DurationReport, ValidateError> {
        if !tokio::fs::try_exists(dir).await? {
            return Err(ValidateError::MissingDirectory(dir.to_path_buf()));
        }

        let mut durations = Vec::new();
        for file in audio_files(dir, &self.extension).await? {
            let seconds = self.probe(&file).await?;
            debug!("{}: {:.2}s", file.display(), seconds);
            durations.push((display_name(&file), seconds));
        }

        check_durations(durations, max_minutes)
    }

    /// Duration in seconds, from ffprobe when available, else from ffmpeg's banner
    pub async fn probe(&self, file: &Path) -> Result<f64, ValidateError> {
        if let Some(ref ffprobe) = self.ffprobe_path {
            let output = Command::new(ffprobe)
                .args([
                    "-v", "error",
                    "-show_entries", "format=duration",
                    "-of", "default=noprint_wrappers=1:nokey=1",
                ])
                .arg(file)
                .stdin(Stdio::null())
                .output()
                .await?;

            if output.status.success() {
                if let Ok(seconds) = String::from_utf8_lossy(&output.stdout).trim().parse::<f64>() {
                    return Ok(seconds);
                }
            }
            debug!("ffprobe gave no duration for {}, falling back to ffmpeg", file.display());
        }

        // ffmpeg exits non-zero without an output file; only the stderr text matters
        let output = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-i"])
            .arg(file)
            .stdin(Stdio::null())
            .output()
            .await?;

        parse_duration(&String::from_utf8_lossy(&output.stderr))
            .ok_or_else(|| ValidateError::Probe(display_name(file)))
    }
}

/// Sum the durations and collect every file longer than `max_minutes`
pub fn check_durations(
    files: Vec<(String, f64)>,
    max_minutes: u32,
) -> Result<DurationReport, ValidateError> {
    let limit = f64::from(max_minutes) * 60.0;

    let violations: Vec<Violation> = files
        .iter()
        .filter(|(_, seconds)| *seconds > limit)
        .map(|(name, seconds)| Violation {
            name: name.clone(),
            minutes: seconds / 60.0,
        })
        .collect();

    if !violations.is_empty() {
        return Err(ValidateError::TooLong {
            max_minutes,
            violations,
        });
    }

    let total_seconds: f64 = files.iter().map(|(_, s)| s).sum();
    Ok(DurationReport {
        files,
        total_seconds,
    })
}

/// Parse `Duration: HH:MM:SS.frac` from ffmpeg's diagnostic output
pub fn parse_duration(ffmpeg_output: &str) -> Option<f64> {
    let re = regex::Regex::new(r"Duration: (\d+):(\d{2}):(\d{2})(?:\.(\d+))?").ok()?;
    let caps = re.captures(ffmpeg_output)?;

    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    let fraction: f64 = match caps.get(4) {
        Some(m) => format!("0.{}", m.as_str()).parse().ok()?,
        None => 0.0,
    };

    Some(hours * 3600.0 + minutes * 60.0 + seconds + fraction)
}

pub fn format_duration(total_seconds: f64) -> String {
    let total = total_seconds.max(0.0).round() as u64;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}
