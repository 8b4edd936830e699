//! Output directory housekeeping

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Create `dir`, or empty it if it already exists.
///
/// Returns `true` when existing entries were removed.
pub async fn prepare_output_dir(dir: &Path) -> std::io::Result<bool> {
    if !fs::try_exists(dir).await? {
        fs::create_dir_all(dir).await?;
        debug!("Created output directory: {}", dir.display());
        return Ok(false);
    }

    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        // symlink_metadata so links are removed, not followed
        let file_type = fs::symlink_metadata(&path).await?.file_type();
        if file_type.is_dir() {
            fs::remove_dir_all(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }
        debug!("Removed {}", path.display());
    }

    Ok(true)
}

/// Regular files in `dir` whose name ends in `.{ext}`, case-insensitively, sorted by name.
pub async fn audio_files(dir: &Path, ext: &str) -> std::io::Result<Vec<PathBuf>> {
    let suffix = format!(".{}", ext.to_lowercase());
    let mut files = Vec::new();

    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if !name.ends_with(&suffix) {
            continue;
        }
        // Dangling links and unreadable entries are not regular files
        let is_file = fs::metadata(entry.path())
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if is_file {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}

/// Display name of a path (file name only).
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prepare_creates_missing_dir() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("musique");

        let cleaned = prepare_output_dir(&out).await.unwrap();
        assert!(!cleaned);
        assert!(out.is_dir());
    }

    #[tokio::test]
    async fn test_prepare_clears_existing_entries() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path();
        std::fs::write(out.join("old.mp3"), b"x").unwrap();
        std::fs::create_dir(out.join("nested")).unwrap();
        std::fs::write(out.join("nested/inner.txt"), b"x").unwrap();

        let cleaned = prepare_output_dir(out).await.unwrap();
        assert!(cleaned);
        assert_eq!(std::fs::read_dir(out).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_audio_files_filters_and_sorts() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path();
        std::fs::write(dir.join("b.mp3"), b"x").unwrap();
        std::fs::write(dir.join("A.MP3"), b"x").unwrap();
        std::fs::write(dir.join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.join("clip.webm"), b"x").unwrap();
        std::fs::create_dir(dir.join("folder.mp3")).unwrap();

        let files = audio_files(dir, "mp3").await.unwrap();
        let names: Vec<_> = files.iter().map(|p| display_name(p)).collect();
        assert_eq!(names, vec!["A.MP3", "b.mp3"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_audio_files_skips_dangling_symlink() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path();
        std::fs::write(dir.join("a.mp3"), b"x").unwrap();
        std::os::unix::fs::symlink(dir.join("gone"), dir.join("broken.mp3")).unwrap();

        let files = audio_files(dir, "mp3").await.unwrap();
        assert_eq!(files, vec![dir.join("a.mp3")]);
    }

    #[tokio::test]
    async fn test_audio_files_empty_dir() {
        let root = tempfile::tempdir().unwrap();
        assert!(audio_files(root.path(), "mp3").await.unwrap().is_empty());
    }
}
