//! Error types for ytmp3-core

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Ytmp3Error>;

#[derive(Error, Debug)]
pub enum Ytmp3Error {
    #[error("ffmpeg setup failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Download failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("Normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Duration check failed: {0}")]
    Validate(#[from] ValidateError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error(
        "ffmpeg is not installed or not in PATH and automatic download is only available on Linux (host: {0}).\n\
         Installation instructions:\n  \
         Ubuntu/Debian: sudo apt install ffmpeg\n  \
         macOS: brew install ffmpeg\n  \
         Windows: download from https://ffmpeg.org/"
    )]
    UnsupportedPlatform(String),

    #[error("Unsupported architecture: {0}. Please install ffmpeg manually.")]
    UnsupportedArchitecture(String),

    #[error("Failed to download {url}: {reason}. Please install ffmpeg manually (sudo apt install ffmpeg).")]
    Download { url: String, reason: String },

    #[error("Failed to extract ffmpeg from {archive}: {reason}")]
    Extract { archive: PathBuf, reason: String },

    #[error("ffmpeg at {0} is missing or not executable")]
    NotExecutable(PathBuf),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("yt-dlp not found. Install with: pip install yt-dlp (or your package manager)")]
    YtDlpNotFound,

    #[error("yt-dlp failed with exit code {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("Failed to parse playlist listing: {0}")]
    ListingParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Output directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("Failed to normalize {file}: ffmpeg exited with {code:?}: {stderr}")]
    Failed {
        file: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file longer than the configured maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub name: String,
    pub minutes: f64,
}

#[derive(Error, Debug)]
pub enum ValidateError {
    #[error("Output directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("Could not determine the duration of {0}")]
    Probe(String),

    #[error("{} file(s) exceed the {max_minutes} minute limit:\n{}", .violations.len(), format_violations(.violations))]
    TooLong {
        max_minutes: u32,
        violations: Vec<Violation>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {} ({:.1} min)", v.name, v.minutes))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    LoadError(String),

    #[error("Invalid config value: {0}")]
    InvalidValue(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_long_lists_every_offender() {
        let err = ValidateError::TooLong {
            max_minutes: 79,
            violations: vec![
                Violation { name: "a.mp3".into(), minutes: 80.5 },
                Violation { name: "b.mp3".into(), minutes: 120.0 },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 file(s) exceed the 79 minute limit"));
        assert!(msg.contains("a.mp3 (80.5 min)"));
        assert!(msg.contains("b.mp3 (120.0 min)"));
    }
}
