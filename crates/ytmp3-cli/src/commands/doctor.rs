use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::Command;
use ytmp3_core::{
    config::Config,
    locator::{is_executable, locate_ffprobe, BinaryLocator},
};

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let locator = BinaryLocator::from_config(&config)?;

    println!("ytmp3 dependency check\n");

    let mut all_ok = true;

    // Check yt-dlp
    print!("yt-dlp:   ");
    match config.yt_dlp_path() {
        Some(path) => all_ok &= report_version(&path, "--version", |out| out.trim().to_string()),
        None => {
            println!("NOT FOUND");
            println!("          Install with: pip install yt-dlp");
            all_ok = false;
        }
    }

    // Check ffmpeg
    print!("ffmpeg:   ");
    let ffmpeg = locator.locate();
    match ffmpeg {
        Some(ref path) => all_ok &= report_version(path, "-version", ffmpeg_version),
        None if cfg!(target_os = "linux") => {
            println!("NOT FOUND (a static build will be downloaded on first run)");
        }
        None => {
            println!("NOT FOUND");
            println!("          Install with: brew install ffmpeg (macOS) or from https://ffmpeg.org/");
            all_ok = false;
        }
    }

    // ffprobe is optional; durations fall back to ffmpeg's output
    print!("ffprobe:  ");
    let ffprobe = ffmpeg
        .as_deref()
        .and_then(|f| locate_ffprobe(f, config.paths.ffprobe.as_deref()));
    match ffprobe {
        Some(ref path) => {
            report_version(path, "-version", ffmpeg_version);
        }
        None => println!("not found (optional)"),
    }

    // Provisioned copy
    let cached = locator.cached_binary();
    print!("cache:    ");
    if is_executable(&cached) {
        println!("{}", cached.display());
    } else {
        println!("empty ({})", cached.display());
    }

    println!("\noutput:   {}", display_or(config.output_dir().ok()));

    println!();
    if all_ok {
        println!("All dependencies OK!");
    } else {
        println!("Some dependencies are missing. See above for installation instructions.");
    }

    Ok(())
}

/// Print `OK (<version>)` and return whether the tool ran
fn report_version(path: &Path, flag: &str, version: impl Fn(&str) -> String) -> bool {
    match Command::new(path).arg(flag).output() {
        Ok(out) if out.status.success() => {
            let v = version(&String::from_utf8_lossy(&out.stdout));
            println!("OK ({}, {})", v, path.display());
            true
        }
        _ => {
            println!("FOUND at {} but failed to get version", path.display());
            false
        }
    }
}

/// `ffmpeg version 6.1.1-static https://...` -> `6.1.1-static`
fn ffmpeg_version(stdout: &str) -> String {
    stdout
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(2))
        .unwrap_or("unknown")
        .to_string()
}

fn display_or(path: Option<PathBuf>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "(unknown)".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_version() {
        assert_eq!(
            ffmpeg_version("ffmpeg version 6.1.1-static https://johnvansickle.com/ffmpeg/  Copyright (c) 2000-2023\nbuilt with gcc 8"),
            "6.1.1-static"
        );
        assert_eq!(ffmpeg_version(""), "unknown");
    }
}
