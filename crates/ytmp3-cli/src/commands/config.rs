use anyhow::Result;
use std::path::Path;
use ytmp3_core::config::Config;

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;

    println!("ytmp3 configuration\n");
    print!("{}", config.to_toml()?);

    println!("\nResolved paths:");
    match config.yt_dlp_path() {
        Some(p) => println!("  yt-dlp = {}", p.display()),
        None => println!("  yt-dlp = (not found)"),
    }
    match config.paths.ffmpeg {
        Some(ref p) => println!("  ffmpeg = {}", p.display()),
        None => match which::which("ffmpeg") {
            Ok(p) => println!("  ffmpeg = {}", p.display()),
            Err(_) => println!("  ffmpeg = {} (provisioned)", config.cache_dir()?.join("ffmpeg").display()),
        },
    }
    println!("  output = {}", config.output_dir()?.display());

    // Show config file locations
    println!("\nConfig file locations (in priority order):");
    println!("  1. Environment variables (YTMP3_<SECTION>__<KEY>)");
    if let Some(p) = config_path {
        println!("  2. {} (specified)", p.display());
    }
    if let Some(p) = Config::default_file() {
        println!("  3. {}", p.display());
    }

    Ok(())
}
