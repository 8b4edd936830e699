//! Locate the ffmpeg executable, provisioning a static Linux build when missing

use crate::config::Config;
use crate::error::{ConfigError, ProvisionError};
use futures::StreamExt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Architectures with a published static build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticArch {
    Amd64,
    Arm64,
    Armhf,
    Armel,
}

impl StaticArch {
    /// Map a `uname -m` style machine name to a build identifier
    pub fn from_machine(machine: &str) -> Result<Self, ProvisionError> {
        match machine.trim().to_lowercase().as_str() {
            "x86_64" | "amd64" => Ok(StaticArch::Amd64),
            "aarch64" | "arm64" => Ok(StaticArch::Arm64),
            "armv7l" | "armv7" | "armhf" => Ok(StaticArch::Armhf),
            "armv6l" | "armel" => Ok(StaticArch::Armel),
            other => Err(ProvisionError::UnsupportedArchitecture(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StaticArch::Amd64 => "amd64",
            StaticArch::Arm64 => "arm64",
            StaticArch::Armhf => "armhf",
            StaticArch::Armel => "armel",
        }
    }
}

impl std::fmt::Display for StaticArch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress updates while provisioning
#[derive(Debug, Clone)]
pub enum ProvisionProgress {
    Downloading { url: String, arch: StaticArch },
    Bytes { downloaded: u64, total: Option<u64> },
    Extracting,
    Installed { path: PathBuf },
}

#[derive(Debug)]
pub struct BinaryLocator {
    configured: Option<PathBuf>,
    cache_dir: PathBuf,
    url_template: String,
}

impl BinaryLocator {
    pub fn new(cache_dir: PathBuf, url_template: String) -> Self {
        Self {
            configured: None,
            cache_dir,
            url_template,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            configured: config.paths.ffmpeg.clone(),
            cache_dir: config.cache_dir()?,
            url_template: config.provision.url_template.clone(),
        })
    }

    /// Path of the locally provisioned copy
    pub fn cached_binary(&self) -> PathBuf {
        self.cache_dir.join("ffmpeg")
    }

    /// Find ffmpeg without downloading anything
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(ref path) = self.configured {
            return Some(path.clone());
        }
        if let Ok(path) = which::which("ffmpeg") {
            return Some(path);
        }
        let cached = self.cached_binary();
        is_executable(&cached).then_some(cached)
    }

    /// Find ffmpeg, downloading a static build on Linux if needed
    pub async fn locate_or_provision(
        &self,
        progress: impl Fn(ProvisionProgress),
    ) -> Result<PathBuf, ProvisionError> {
        if let Some(ref path) = self.configured {
            if !is_executable(path) {
                return Err(ProvisionError::NotExecutable(path.clone()));
            }
        }
        if let Some(path) = self.locate() {
            debug!("Using ffmpeg at {}", path.display());
            return Ok(path);
        }

        if !cfg!(target_os = "linux") {
            return Err(ProvisionError::UnsupportedPlatform(
                std::env::consts::OS.to_string(),
            ));
        }

        let arch = StaticArch::from_machine(&host_machine())?;
        self.provision(arch, progress).await
    }

    async fn provision(
        &self,
        arch: StaticArch,
        progress: impl Fn(ProvisionProgress),
    ) -> Result<PathBuf, ProvisionError> {
        let url = self.url_template.replace("{arch}", arch.as_str());
        info!("ffmpeg not found in PATH, downloading static build for {}", arch);
        progress(ProvisionProgress::Downloading {
            url: url.clone(),
            arch,
        });

        fs::create_dir_all(&self.cache_dir)?;
        let archive_name = url.rsplit('/').next().unwrap_or("ffmpeg.tar.xz");
        let archive_path = self.cache_dir.join(archive_name);

        if let Err(e) = download(&url, &archive_path, &progress).await {
            fs::remove_file(&archive_path).ok();
            return Err(e);
        }

        progress(ProvisionProgress::Extracting);
        let binary = self.cached_binary();
        let extracted = extract_member(&archive_path, "ffmpeg", &binary);
        fs::remove_file(&archive_path).ok();
        extracted?;

        make_executable(&binary)?;

        if !is_executable(&binary) {
            return Err(ProvisionError::NotExecutable(binary));
        }

        info!("ffmpeg installed to {}", binary.display());
        progress(ProvisionProgress::Installed {
            path: binary.clone(),
        });
        Ok(binary)
    }
}

async fn download(
    url: &str,
    dest: &Path,
    progress: &impl Fn(ProvisionProgress),
) -> Result<(), ProvisionError> {
    let response = reqwest::get(url).await.map_err(|e| ProvisionError::Download {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if !response.status().is_success() {
        return Err(ProvisionError::Download {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let total = response.content_length();
    let mut file = fs::File::create(dest)?;
    let mut downloaded: u64 = 0;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
        progress(ProvisionProgress::Bytes { downloaded, total });
    }
    file.flush()?;

    debug!("Downloaded {} bytes to {}", downloaded, dest.display());
    Ok(())
}

/// Copy the single regular file named `member` (at any depth) out of a `.tar.xz`
fn extract_member(archive_path: &Path, member: &str, dest: &Path) -> Result<(), ProvisionError> {
    let extract_err = |reason: String| ProvisionError::Extract {
        archive: archive_path.to_path_buf(),
        reason,
    };

    let file = fs::File::open(archive_path)?;
    let mut archive = tar::Archive::new(xz2::read::XzDecoder::new(file));

    for entry in archive.entries().map_err(|e| extract_err(e.to_string()))? {
        let mut entry = entry.map_err(|e| extract_err(e.to_string()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let is_member = entry
            .path()
            .map_err(|e| extract_err(e.to_string()))?
            .file_name()
            .is_some_and(|name| name == member);
        if !is_member {
            continue;
        }

        let mut out = fs::File::create(dest)?;
        io::copy(&mut entry, &mut out).map_err(|e| extract_err(e.to_string()))?;
        return Ok(());
    }

    Err(extract_err(format!("no '{}' member in archive", member)))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Regular file with at least one execute bit set
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Runtime machine name, falling back to the compile-time architecture
fn host_machine() -> String {
    std::process::Command::new("uname")
        .arg("-m")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| std::env::consts::ARCH.to_string())
}

/// `ffprobe` next to `ffmpeg`, then the configured path, then `PATH`
pub fn locate_ffprobe(ffmpeg: &Path, configured: Option<&Path>) -> Option<PathBuf> {
    let sibling = ffmpeg.with_file_name("ffprobe");
    if is_executable(&sibling) {
        return Some(sibling);
    }
    if let Some(path) = configured {
        return Some(path.to_path_buf());
    }
    which::which("ffprobe").ok()
}
