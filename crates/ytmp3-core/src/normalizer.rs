//! EBU R128 loudness normalization of a whole output directory using FFmpeg

use crate::config::NormalizeConfig;
use crate::error::NormalizeError;
use crate::library::{audio_files, display_name};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct LoudnessTarget {
    pub integrated_lufs: f32,
    pub true_peak: f32,
    pub lra: f32,
    pub sample_rate: u32,
}

impl From<&NormalizeConfig> for LoudnessTarget {
    fn from(config: &NormalizeConfig) -> Self {
        Self {
            integrated_lufs: config.target_lufs,
            true_peak: config.true_peak,
            lra: config.lra,
            sample_rate: config.sample_rate,
        }
    }
}

impl LoudnessTarget {
    fn filter(&self) -> String {
        format!(
            "loudnorm=I={}:TP={}:LRA={}",
            self.integrated_lufs, self.true_peak, self.lra
        )
    }
}

#[derive(Debug)]
pub struct Normalizer {
    ffmpeg_path: PathBuf,
    target: LoudnessTarget,
    extension: String,
    /// Re-encode bitrate in kbps; ffmpeg's encoder default otherwise
    bitrate: Option<String>,
}

impl Normalizer {
    pub fn new(ffmpeg_path: PathBuf, target: LoudnessTarget, extension: impl Into<String>) -> Self {
        Self {
            ffmpeg_path,
            target,
            extension: extension.into(),
            bitrate: None,
        }
    }

    pub fn with_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.bitrate = Some(bitrate.into());
        self
    }

    /// Normalize every audio file in `dir` in place, stopping at the first failure.
    ///
    /// `on_file` receives `(index, total, name)` before each file is processed.
    /// Returns the number of files normalized.
    pub async fn normalize_all(
        &self,
        dir: &Path,
        mut on_file: impl FnMut(usize, usize, &str),
    ) -> Result<usize, NormalizeError> {
        if !tokio::fs::try_exists(dir).await? {
            return Err(NormalizeError::MissingDirectory(dir.to_path_buf()));
        }

        let files = audio_files(dir, &self.extension).await?;
        if files.is_empty() {
            info!("No {} files found to normalize", self.extension);
            return Ok(0);
        }

        info!(
            "Normalizing {} file(s) to {:.1} LUFS",
            files.len(),
            self.target.integrated_lufs
        );

        for (i, file) in files.iter().enumerate() {
            on_file(i + 1, files.len(), &display_name(file));
            self.normalize_file(dir, file).await?;
        }

        Ok(files.len())
    }

    /// Single-pass loudnorm into a temporary sibling, then rename over the original
    async fn normalize_file(&self, dir: &Path, input: &Path) -> Result<(), NormalizeError> {
        let temp = tempfile::Builder::new()
            .prefix(".normalize-")
            .suffix(&format!(".{}", self.extension))
            .tempfile_in(dir)?;

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-loglevel", "error"]);
        cmd.arg("-i").arg(input);
        cmd.args(["-af", &self.target.filter()]);
        cmd.args(["-ar", &self.target.sample_rate.to_string()]);
        if let Some(ref bitrate) = self.bitrate {
            cmd.args(["-b:a", &format!("{}k", bitrate.trim_end_matches(['k', 'K']))]);
        }
        cmd.arg("-y").arg(temp.path());

        let output = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let name = display_name(input);
            // Remove the partial output before reporting
            temp.close()?;
            return Err(NormalizeError::Failed {
                file: name,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        temp.persist(input).map_err(|e| NormalizeError::Io(e.error))?;
        debug!("Normalized: {}", input.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> LoudnessTarget {
        LoudnessTarget::from(&crate::Config::default().normalize)
    }

    #[test]
    fn test_filter_string() {
        assert_eq!(target().filter(), "loudnorm=I=-23:TP=-2:LRA=11");
    }

    #[tokio::test]
    async fn test_empty_dir_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"x").unwrap();

        // The binary is never invoked for an empty batch
        let normalizer = Normalizer::new(PathBuf::from("/nonexistent/ffmpeg"), target(), "mp3");
        let mut calls = 0;
        let count = normalizer
            .normalize_all(dir.path(), |_, _, _| calls += 1)
            .await
            .unwrap();

        assert_eq!(count, 0);
        assert_eq!(calls, 0);
        assert_eq!(std::fs::read(dir.path().join("cover.jpg")).unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let normalizer = Normalizer::new(PathBuf::from("ffmpeg"), target(), "mp3");
        let result = normalizer
            .normalize_all(&dir.path().join("gone"), |_, _, _| {})
            .await;
        assert!(matches!(result, Err(NormalizeError::MissingDirectory(_))));
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_replaces_files_in_place() {
        let bin = tempfile::tempdir().unwrap();
        // Writes a marker into the last argument (the output path)
        let ffmpeg = fake_ffmpeg(bin.path(), "for last; do :; done\necho normalized > \"$last\"");

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"raw").unwrap();
        std::fs::write(dir.path().join("B.MP3"), b"raw").unwrap();

        let mut seen = Vec::new();
        let count = Normalizer::new(ffmpeg, target(), "mp3")
            .with_bitrate("320")
            .normalize_all(dir.path(), |i, total, name| seen.push((i, total, name.to_string())))
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            seen,
            vec![(1, 2, "B.MP3".to_string()), (2, 2, "a.mp3".to_string())]
        );
        for name in ["a.mp3", "B.MP3"] {
            assert_eq!(std::fs::read_to_string(dir.path().join(name)).unwrap(), "normalized\n");
        }
        // No temporary files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_aborts_and_cleans_up() {
        let bin = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(bin.path(), "echo 'Invalid data found' >&2\nexit 1");

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"raw").unwrap();
        std::fs::write(dir.path().join("b.mp3"), b"raw").unwrap();

        let mut calls = 0;
        let result = Normalizer::new(ffmpeg, target(), "mp3")
            .normalize_all(dir.path(), |_, _, _| calls += 1)
            .await;

        match result {
            Err(NormalizeError::Failed { file, code, stderr }) => {
                assert_eq!(file, "a.mp3");
                assert_eq!(code, Some(1));
                assert!(stderr.contains("Invalid data found"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // Fail fast: the second file is never attempted
        assert_eq!(calls, 1);
        assert_eq!(std::fs::read(dir.path().join("a.mp3")).unwrap(), b"raw");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
