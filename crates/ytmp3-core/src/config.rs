//! Configuration management for ytmp3

use crate::error::ConfigError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub output: OutputConfig,
    pub download: DownloadConfig,
    pub normalize: NormalizeConfig,
    pub validate: ValidateConfig,
    pub provision: ProvisionConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Path to yt-dlp binary (auto-detected if not set)
    pub yt_dlp: Option<PathBuf>,
    /// Path to ffmpeg binary (auto-detected or provisioned if not set)
    pub ffmpeg: Option<PathBuf>,
    /// Path to ffprobe binary (auto-detected if not set)
    pub ffprobe: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory (defaults to `musique` next to the executable)
    pub directory: Option<PathBuf>,
    /// Audio file extension produced by the transcode
    pub extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Target MP3 bitrate in kbps
    pub bitrate: String,
    /// yt-dlp format selector
    pub format: String,
    pub retries: u32,
    pub fragment_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Normalize by default
    pub enabled: bool,
    /// Integrated loudness target (default: -23.0, EBU R128)
    pub target_lufs: f32,
    /// True peak ceiling in dBTP (default: -2.0)
    pub true_peak: f32,
    /// Loudness range target (default: 11.0)
    pub lra: f32,
    /// Output sample rate
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateConfig {
    /// Longest allowed track, in minutes
    pub max_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Static build URL; `{arch}` is replaced by the resolved architecture
    pub url_template: String,
    /// Where the provisioned ffmpeg lives (defaults to `.local/ffmpeg` next to the executable)
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            output: OutputConfig {
                directory: None,
                extension: "mp3".to_string(),
            },
            download: DownloadConfig {
                bitrate: "320".to_string(),
                format: "bestaudio[ext!=m3u8][protocol!=m3u8_native]/bestaudio[ext!=m3u8]/bestaudio/best[ext!=m3u8][protocol!=m3u8_native]/best".to_string(),
                retries: 10,
                fragment_retries: 10,
            },
            normalize: NormalizeConfig {
                enabled: true,
                target_lufs: -23.0,
                true_peak: -2.0,
                lra: 11.0,
                sample_rate: 44100,
            },
            validate: ValidateConfig { max_minutes: 79 },
            provision: ProvisionConfig {
                url_template:
                    "https://johnvansickle.com/ffmpeg/releases/ffmpeg-release-{arch}-static.tar.xz"
                        .to_string(),
                cache_dir: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Load from default config directory
        if let Some(path) = Self::default_file() {
            if path.exists() {
                figment = figment.merge(Toml::file(&path));
            }
        }

        // Load from specified config file
        if let Some(path) = config_file {
            if !path.exists() {
                return Err(ConfigError::LoadError(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        // Nested keys use a double underscore: YTMP3_NORMALIZE__TARGET_LUFS
        figment = figment.merge(Env::prefixed("YTMP3_").split("__"));

        let config: Config = figment
            .extract()
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// `<config dir>/ytmp3/config.toml`
    pub fn default_file() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("ytmp3/config.toml"))
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.validate.max_minutes == 0 {
            return Err(ConfigError::InvalidValue(
                "validate.max_minutes must be at least 1".to_string(),
            ));
        }
        if !self.provision.url_template.contains("{arch}") {
            return Err(ConfigError::InvalidValue(
                "provision.url_template must contain {arch}".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue(e.to_string()))
    }

    /// Get yt-dlp path, auto-detecting if not configured
    pub fn yt_dlp_path(&self) -> Option<PathBuf> {
        self.paths
            .yt_dlp
            .clone()
            .or_else(|| which::which("yt-dlp").ok())
    }

    /// Output directory, defaulting to `musique` next to the executable
    pub fn output_dir(&self) -> Result<PathBuf, ConfigError> {
        match self.output.directory {
            Some(ref dir) => Ok(dir.clone()),
            None => Ok(program_dir()?.join("musique")),
        }
    }

    /// Directory holding the provisioned ffmpeg
    pub fn cache_dir(&self) -> Result<PathBuf, ConfigError> {
        match self.provision.cache_dir {
            Some(ref dir) => Ok(dir.clone()),
            None => Ok(program_dir()?.join(".local").join("ffmpeg")),
        }
    }
}

/// Directory containing the running executable
pub fn program_dir() -> Result<PathBuf, ConfigError> {
    let exe = std::env::current_exe()?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| ConfigError::InvalidValue(format!("no parent directory for {}", exe.display())))
}
