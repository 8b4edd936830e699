//! Playlist enumeration and audio download using yt-dlp

use crate::error::ExtractError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, trace};

/// Prefix of the lines we ask yt-dlp to print, so they can be told apart from its own output
const EVENT_TAG: &str = "ytmp3-event";

/// One entry of a flat playlist listing
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub availability: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlatListing {
    #[serde(default)]
    entries: Option<Vec<Option<PlaylistEntry>>>,
}

/// Lifecycle events reported while an item is processed.
///
/// A single item usually produces several of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemEvent {
    /// A media file finished downloading
    Downloaded { filename: PathBuf },
    /// Post-processing finished and the file reached its final name
    Finalized { filename: PathBuf },
}

impl ItemEvent {
    pub fn filename(&self) -> &Path {
        match self {
            ItemEvent::Downloaded { filename } | ItemEvent::Finalized { filename } => filename,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub bitrate: String,
    pub output_dir: PathBuf,
    pub audio_format: String,
    pub format_selector: String,
    pub retries: u32,
    pub fragment_retries: u32,
}

#[derive(Debug)]
pub struct Extractor {
    yt_dlp_path: PathBuf,
    ffmpeg_path: PathBuf,
}

impl Extractor {
    pub fn new(yt_dlp_path: PathBuf, ffmpeg_path: PathBuf) -> Self {
        Self {
            yt_dlp_path,
            ffmpeg_path,
        }
    }

    /// Count the available entries behind `url` without downloading anything
    pub async fn count_entries(&self, url: &str) -> Result<usize, ExtractError> {
        let output = Command::new(&self.yt_dlp_path)
            .args(["--flat-playlist", "--dump-single-json", "--quiet", "--no-warnings"])
            .arg(playlist_flag(url))
            .arg(url)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(ExtractError::Failed {
                code: output.status.code(),
                stderr: tail(&String::from_utf8_lossy(&output.stderr)),
            });
        }

        let count = count_listing(&String::from_utf8_lossy(&output.stdout))?;
        debug!("Flat listing of {} has {} entries", url, count);
        Ok(count)
    }

    /// Download every item and transcode it to the requested audio format.
    ///
    /// `on_event` is called for each lifecycle event yt-dlp reports. The first
    /// failing item aborts the whole run.
    pub async fn download(
        &self,
        request: &DownloadRequest,
        mut on_event: impl FnMut(ItemEvent),
    ) -> Result<(), ExtractError> {
        info!("Downloading audio from: {}", request.url);

        let mut cmd = Command::new(&self.yt_dlp_path);
        cmd.args(download_args(request, &self.ffmpeg_path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ExtractError::Io(std::io::Error::other("yt-dlp stdout unavailable"))
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| {
            ExtractError::Io(std::io::Error::other("yt-dlp stderr unavailable"))
        })?;

        // Drain stderr concurrently so a chatty child never blocks on a full pipe
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            trace!("yt-dlp: {}", line);
            if let Some(event) = parse_event(&line) {
                on_event(event);
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            debug!("yt-dlp stderr: {}", stderr);
            return Err(ExtractError::Failed {
                code: status.code(),
                stderr: tail(&stderr),
            });
        }

        Ok(())
    }
}

/// True when the URL names a single video, even if it also carries a playlist
pub fn is_single_item(url: &str) -> bool {
    let query = match url.split_once('?') {
        Some((_, q)) => q.split('#').next().unwrap_or(""),
        None => return false,
    };
    query
        .split('&')
        .any(|pair| pair.split('=').next() == Some("v") && pair.len() > 2)
}

fn playlist_flag(url: &str) -> &'static str {
    if is_single_item(url) {
        "--no-playlist"
    } else {
        "--yes-playlist"
    }
}

/// Number of non-null entries in a flat listing; a bare item counts as one
pub fn count_listing(json: &str) -> Result<usize, ExtractError> {
    let listing: FlatListing =
        serde_json::from_str(json).map_err(|e| ExtractError::ListingParse(e.to_string()))?;

    Ok(match listing.entries {
        Some(entries) => entries.iter().flatten().count(),
        None => 1,
    })
}

/// `320` becomes `320K`; anything else is passed through for yt-dlp to judge
fn audio_quality(bitrate: &str) -> String {
    let bitrate = bitrate.trim();
    if !bitrate.is_empty() && bitrate.chars().all(|c| c.is_ascii_digit()) {
        format!("{}K", bitrate)
    } else {
        bitrate.to_string()
    }
}

fn download_args(request: &DownloadRequest, ffmpeg_path: &Path) -> Vec<String> {
    let template = request.output_dir.join("%(title)s.%(ext)s");
    vec![
        "-f".into(),
        request.format_selector.clone(),
        "--extract-audio".into(),
        "--audio-format".into(),
        request.audio_format.clone(),
        "--audio-quality".into(),
        audio_quality(&request.bitrate),
        "-o".into(),
        template.to_string_lossy().into_owned(),
        playlist_flag(&request.url).into(),
        "--ffmpeg-location".into(),
        ffmpeg_path.to_string_lossy().into_owned(),
        "--hls-use-mpegts".into(),
        "--retries".into(),
        request.retries.to_string(),
        "--fragment-retries".into(),
        request.fragment_retries.to_string(),
        // Fail fast: stop at the first item that cannot be processed
        "--abort-on-error".into(),
        "--no-write-thumbnail".into(),
        "--no-write-info-json".into(),
        "--no-write-description".into(),
        "--quiet".into(),
        "--no-warnings".into(),
        "--newline".into(),
        "--progress".into(),
        "--no-simulate".into(),
        "--progress-template".into(),
        format!("download:{EVENT_TAG} %(progress.status)s %(progress.filename)s"),
        "--print".into(),
        format!("after_move:{EVENT_TAG} moved %(filepath)s"),
        request.url.clone(),
    ]
}

fn parse_event(line: &str) -> Option<ItemEvent> {
    let rest = line.trim().strip_prefix(EVENT_TAG)?.trim_start();
    let (kind, filename) = rest.split_once(' ')?;
    let filename = filename.trim();
    if filename.is_empty() || filename == "NA" {
        return None;
    }
    let filename = PathBuf::from(filename);

    match kind {
        "finished" => Some(ItemEvent::Downloaded { filename }),
        "moved" => Some(ItemEvent::Finalized { filename }),
        _ => None,
    }
}

/// Last few lines of a process's diagnostic output
fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join("\n")
}
