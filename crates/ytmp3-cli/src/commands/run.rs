use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::debug;

use crate::args::RunOptions;
use ytmp3_core::{
    config::Config,
    locator::ProvisionProgress,
    pipeline::{Pipeline, PipelineStage, RunConfig},
};

pub async fn run(url: &str, options: &RunOptions, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;

    let output_dir = match options.output {
        Some(ref dir) => dir.clone(),
        None => config.output_dir()?,
    };

    let run_config = RunConfig {
        url: url.to_string(),
        bitrate: options
            .bitrate
            .clone()
            .unwrap_or_else(|| config.download.bitrate.clone()),
        normalize: config.normalize.enabled && !options.no_normalize,
        max_minutes: options.max_minutes.unwrap_or(config.validate.max_minutes),
        output_dir,
    };
    debug!("Run configuration: {:?}", run_config);
    let max_minutes = run_config.max_minutes;
    let target_lufs = config.normalize.target_lufs;

    // Create progress channel
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Spawn progress handler
    let progress_handle = tokio::spawn(async move {
        let mut bar: Option<ProgressBar> = None;

        while let Some(stage) = rx.recv().await {
            match stage {
                PipelineStage::Provisioning(progress) => match progress {
                    ProvisionProgress::Downloading { url, arch } => {
                        println!("ffmpeg not found in PATH. Downloading static binary for {}...", arch);
                        println!("URL: {}", url);
                        bar = Some(bytes_bar());
                    }
                    ProvisionProgress::Bytes { downloaded, total } => {
                        if let Some(ref pb) = bar {
                            if let Some(total) = total {
                                pb.set_length(total);
                            }
                            pb.set_position(downloaded);
                        }
                    }
                    ProvisionProgress::Extracting => {
                        if let Some(pb) = bar.take() {
                            pb.finish_and_clear();
                        }
                        println!("Extracting ffmpeg...");
                    }
                    ProvisionProgress::Installed { path } => {
                        println!("ffmpeg successfully installed to: {}", path.display());
                    }
                },
                PipelineStage::Cleaning { dir } => {
                    println!("Output directory: {}", dir.display());
                }
                PipelineStage::Enumerating => {
                    let pb = ProgressBar::new_spinner();
                    pb.set_message("Reading playlist...");
                    pb.enable_steady_tick(std::time::Duration::from_millis(100));
                    bar = Some(pb);
                }
                PipelineStage::Downloading { total } => {
                    if let Some(pb) = bar.take() {
                        pb.finish_and_clear();
                    }
                    bar = Some(count_bar(total as u64, "Downloading"));
                }
                PipelineStage::ItemCompleted { name, completed } => {
                    if let Some(ref pb) = bar {
                        pb.set_message(truncate(&name, 40));
                        pb.set_position(completed as u64);
                    }
                }
                PipelineStage::Downloaded { completed } => {
                    if let Some(pb) = bar.take() {
                        pb.finish();
                    }
                    println!("\nPlaylist download completed successfully! ({} item(s))", completed);
                }
                PipelineStage::Normalizing { index, total, name } => {
                    if index == 1 {
                        println!(
                            "\nNormalizing volume for {} file(s) to {:.1} LUFS (EBU R128)...",
                            total, target_lufs
                        );
                        bar = Some(count_bar(total as u64, "Normalizing"));
                    }
                    if let Some(ref pb) = bar {
                        pb.set_message(truncate(&name, 40));
                        pb.set_position(index as u64 - 1);
                    }
                }
                PipelineStage::Validating => {
                    if let Some(pb) = bar.take() {
                        pb.finish_with_message("done");
                    }
                    println!("\nChecking durations (limit: {} minutes)...", max_minutes);
                }
                PipelineStage::Complete { report, elapsed } => {
                    println!(
                        "All {} file(s) are within the limit. Total playlist duration: {}",
                        report.files.len(),
                        report.total_display()
                    );
                    println!("Finished in {:.1}s", elapsed.as_secs_f32());
                }
                PipelineStage::Failed { stage, .. } => {
                    if let Some(pb) = bar.take() {
                        pb.abandon_with_message(format!("failed at {}", stage));
                    }
                }
            }
        }
    });

    // Run pipeline; dropping it closes the channel
    let result = {
        let pipeline = Pipeline::new(run_config, config, tx);
        pipeline.run().await
    };

    // Wait for progress handler
    progress_handle.await?;

    result?;
    Ok(())
}

fn count_bar(total: u64, prefix: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix} {bar:40.cyan/blue} {pos}/{len} [{elapsed_precise}<{eta}] {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    pb.set_prefix(prefix);
    pb
}

fn bytes_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    pb
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 40), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
        // Multi-byte titles are cut on character boundaries
        assert_eq!(truncate("ééééééééé", 6), "ééé...");
    }
}
