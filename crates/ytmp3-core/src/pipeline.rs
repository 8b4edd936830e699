//! Pipeline orchestration: clean, enumerate, download, normalize, validate

use crate::config::Config;
use crate::error::{ExtractError, Ytmp3Error};
use crate::extractor::{DownloadRequest, Extractor, ItemEvent};
use crate::library::{display_name, prepare_output_dir};
use crate::locator::{locate_ffprobe, BinaryLocator, ProvisionProgress};
use crate::normalizer::{LoudnessTarget, Normalizer};
use crate::validator::{DurationReport, Validator};

use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Settings for one invocation
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub url: String,
    pub bitrate: String,
    pub normalize: bool,
    pub max_minutes: u32,
    pub output_dir: PathBuf,
}

/// Pipeline progress stages
#[derive(Debug, Clone)]
pub enum PipelineStage {
    Provisioning(ProvisionProgress),
    Cleaning { dir: PathBuf },
    Enumerating,
    Downloading { total: usize },
    ItemCompleted { name: String, completed: usize },
    Downloaded { completed: usize },
    Normalizing { index: usize, total: usize, name: String },
    Validating,
    Complete { report: DurationReport, elapsed: Duration },
    Failed { stage: String, error: String },
}

/// Counts each output item once, however many lifecycle events it produces
#[derive(Debug, Default)]
pub struct CompletionTracker {
    seen: HashSet<PathBuf>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new completed count if this event is the first for its item
    pub fn record(&mut self, event: &ItemEvent) -> Option<usize> {
        let key = output_identity(event.filename());
        if self.seen.insert(key) {
            Some(self.seen.len())
        } else {
            None
        }
    }

    pub fn completed(&self) -> usize {
        self.seen.len()
    }
}

/// `dir/Title.f251.webm` and `dir/Title.mp3` both map to `dir/Title`
fn output_identity(path: &Path) -> PathBuf {
    let stem = path.with_extension("");
    match stem.extension().and_then(|e| e.to_str()) {
        Some(ext) if is_format_id(ext) => stem.with_extension(""),
        _ => stem,
    }
}

fn is_format_id(ext: &str) -> bool {
    ext.len() > 1 && ext.starts_with('f') && ext[1..].chars().all(|c| c.is_ascii_digit())
}

/// Main processing pipeline
pub struct Pipeline {
    run: RunConfig,
    config: Config,
    progress_tx: mpsc::UnboundedSender<PipelineStage>,
}

impl Pipeline {
    pub fn new(run: RunConfig, config: Config, progress_tx: mpsc::UnboundedSender<PipelineStage>) -> Self {
        Self {
            run,
            config,
            progress_tx,
        }
    }

    pub async fn run(&self) -> Result<DurationReport, Ytmp3Error> {
        let start_time = Instant::now();
        info!("Starting pipeline for: {}", self.run.url);

        // 0. Tools
        let locator = BinaryLocator::from_config(&self.config).map_err(self.failed("setup"))?;
        let ffmpeg_path = locator
            .locate_or_provision(|p| self.emit(PipelineStage::Provisioning(p)))
            .await
            .map_err(self.failed("setup"))?;
        let ffprobe_path = locate_ffprobe(&ffmpeg_path, self.config.paths.ffprobe.as_deref());
        let yt_dlp_path = self
            .config
            .yt_dlp_path()
            .ok_or(ExtractError::YtDlpNotFound)
            .map_err(self.failed("setup"))?;
        debug!(
            "Tools: ffmpeg={}, ffprobe={:?}, yt-dlp={}",
            ffmpeg_path.display(),
            ffprobe_path,
            yt_dlp_path.display()
        );

        let output_dir = &self.run.output_dir;
        let extension = self.config.output.extension.clone();

        // 1. Clean
        self.emit(PipelineStage::Cleaning {
            dir: output_dir.clone(),
        });
        prepare_output_dir(output_dir)
            .await
            .map_err(self.failed("clean"))?;

        // 2. Enumerate
        self.emit(PipelineStage::Enumerating);
        let extractor = Extractor::new(yt_dlp_path, ffmpeg_path.clone());
        let total = extractor
            .count_entries(&self.run.url)
            .await
            .map_err(self.failed("enumerate"))?;
        info!("{} item(s) to download", total);

        // 3. Download and transcode
        self.emit(PipelineStage::Downloading { total });
        let request = DownloadRequest {
            url: self.run.url.clone(),
            bitrate: self.run.bitrate.clone(),
            output_dir: output_dir.clone(),
            audio_format: extension.clone(),
            format_selector: self.config.download.format.clone(),
            retries: self.config.download.retries,
            fragment_retries: self.config.download.fragment_retries,
        };

        let mut tracker = CompletionTracker::new();
        extractor
            .download(&request, |event| {
                if let Some(completed) = tracker.record(&event) {
                    self.emit(PipelineStage::ItemCompleted {
                        name: display_name(event.filename()),
                        completed,
                    });
                }
            })
            .await
            .map_err(self.failed("download"))?;

        if tracker.completed() != total {
            warn!(
                "Expected {} item(s) but yt-dlp reported {}",
                total,
                tracker.completed()
            );
        }
        self.emit(PipelineStage::Downloaded {
            completed: tracker.completed(),
        });

        // 4. Normalize (if enabled)
        if self.run.normalize {
            let normalizer = Normalizer::new(
                ffmpeg_path.clone(),
                LoudnessTarget::from(&self.config.normalize),
                extension.clone(),
            )
            .with_bitrate(self.run.bitrate.clone());

            normalizer
                .normalize_all(output_dir, |index, total, name| {
                    self.emit(PipelineStage::Normalizing {
                        index,
                        total,
                        name: name.to_string(),
                    })
                })
                .await
                .map_err(self.failed("normalize"))?;
        }

        // 5. Validate
        self.emit(PipelineStage::Validating);
        let validator = Validator::new(ffmpeg_path, ffprobe_path, extension);
        let report = validator
            .validate(output_dir, self.run.max_minutes)
            .await
            .map_err(self.failed("validate"))?;

        let elapsed = start_time.elapsed();
        info!(
            "Pipeline complete: {} file(s), {} total ({:.1}s)",
            report.files.len(),
            report.total_display(),
            elapsed.as_secs_f32()
        );

        self.emit(PipelineStage::Complete {
            report: report.clone(),
            elapsed,
        });

        Ok(report)
    }

    fn emit(&self, stage: PipelineStage) {
        // The receiver going away only means nobody is rendering progress
        let _ = self.progress_tx.send(stage);
    }

    /// Report a failed stage, passing the error through
    fn failed<'a, E: Display>(&'a self, stage: &'a str) -> impl FnOnce(E) -> E + 'a {
        move |e| {
            self.emit(PipelineStage::Failed {
                stage: stage.to_string(),
                error: e.to_string(),
            });
            e
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(path: &str) -> ItemEvent {
        ItemEvent::Downloaded {
            filename: PathBuf::from(path),
        }
    }

    fn moved(path: &str) -> ItemEvent {
        ItemEvent::Finalized {
            filename: PathBuf::from(path),
        }
    }

    #[test]
    fn test_tracker_counts_each_item_once() {
        let mut tracker = CompletionTracker::new();

        assert_eq!(tracker.record(&finished("/m/One.webm")), Some(1));
        assert_eq!(tracker.record(&finished("/m/One.webm")), None);
        assert_eq!(tracker.record(&moved("/m/One.mp3")), None);
        assert_eq!(tracker.record(&finished("/m/Two.f251.webm")), Some(2));
        assert_eq!(tracker.record(&moved("/m/Two.mp3")), None);
        assert_eq!(tracker.record(&moved("/m/Three.mp3")), Some(3));
        assert_eq!(tracker.completed(), 3);
    }

    #[test]
    fn test_output_identity() {
        assert_eq!(output_identity(Path::new("/m/Song.mp3")), PathBuf::from("/m/Song"));
        assert_eq!(output_identity(Path::new("/m/Song.f140.m4a")), PathBuf::from("/m/Song"));
        assert_eq!(output_identity(Path::new("/m/Vol. 2.mp3")), PathBuf::from("/m/Vol. 2"));
        assert_eq!(
            output_identity(Path::new("/m/Live.final.webm")),
            PathBuf::from("/m/Live.final")
        );
    }

    #[tokio::test]
    async fn test_setup_failure_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.ffmpeg = Some(root.path().join("no-such-ffmpeg"));
        config.provision.cache_dir = Some(root.path().join("cache"));

        let run = RunConfig {
            url: "https://www.youtube.com/watch?v=abc".to_string(),
            bitrate: "320".to_string(),
            normalize: true,
            max_minutes: 79,
            output_dir: root.path().join("musique"),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = Pipeline::new(run, config, tx).run().await;
        assert!(matches!(
            result,
            Err(Ytmp3Error::Provision(crate::error::ProvisionError::NotExecutable(_)))
        ));

        let mut failed_at = None;
        while let Ok(stage) = rx.try_recv() {
            if let PipelineStage::Failed { stage, .. } = stage {
                failed_at = Some(stage);
            }
        }
        assert_eq!(failed_at.as_deref(), Some("setup"));
        assert!(!root.path().join("musique").exists());
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Stand-in yt-dlp: a flat listing of 3 entries plus a null, or three downloads
    #[cfg(unix)]
    const FAKE_YT_DLP: &str = r#"
case "$1" in
  --flat-playlist)
    echo '{"entries": [{"id": "a", "title": "One"}, null, {"id": "b", "title": "Two"}, {"id": "c", "title": "Three"}]}'
    exit 0 ;;
esac
template=""
prev=""
for arg; do
  if [ "$prev" = "-o" ]; then template="$arg"; fi
  prev="$arg"
done
dir=$(dirname "$template")
for t in One Two Three; do
  echo "ytmp3-event finished $dir/$t.webm"
  echo "ytmp3-event finished $dir/$t.webm"
  printf 'audio' > "$dir/$t.mp3"
  echo "ytmp3-event moved $dir/$t.mp3"
done
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_full_run_with_stand_in_tools() {
        let bin = tempfile::tempdir().unwrap();
        let yt_dlp = script(bin.path(), "yt-dlp", FAKE_YT_DLP);
        let ffmpeg = script(
            bin.path(),
            "ffmpeg",
            "echo '  Duration: 00:04:00.00, start: 0.000000' >&2\nexit 1",
        );

        let root = tempfile::tempdir().unwrap();
        let output_dir = root.path().join("musique");
        std::fs::create_dir(&output_dir).unwrap();
        std::fs::write(output_dir.join("stale.mp3"), b"old").unwrap();

        let mut config = Config::default();
        config.paths.ffmpeg = Some(ffmpeg);
        config.paths.ffprobe = None;
        config.paths.yt_dlp = Some(yt_dlp);

        let run = RunConfig {
            url: "https://www.youtube.com/playlist?list=PL1".to_string(),
            bitrate: "320".to_string(),
            normalize: false,
            max_minutes: 79,
            output_dir: output_dir.clone(),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = Pipeline::new(run, config, tx).run().await.unwrap();

        // A system ffprobe cannot read the stand-in files, so durations come from the ffmpeg banner
        assert_eq!(report.files.len(), 3);
        assert_eq!(report.total_display(), "12:00");
        assert!(!output_dir.join("stale.mp3").exists());

        let mut total = None;
        let mut completed = Vec::new();
        while let Ok(stage) = rx.try_recv() {
            match stage {
                PipelineStage::Downloading { total: t } => total = Some(t),
                PipelineStage::ItemCompleted { completed: n, .. } => completed.push(n),
                _ => {}
            }
        }
        assert_eq!(total, Some(3));
        assert_eq!(completed, vec![1, 2, 3]);
    }
}
