use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ytmp3")]
#[command(author, version, about = "Download YouTube playlist videos as normalized MP3s")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// URL of the YouTube playlist (or a single video)
    #[arg(value_name = "URL")]
    pub url: Option<String>,

    #[command(flatten)]
    pub options: RunOptions,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that ffmpeg, ffprobe and yt-dlp are available
    Doctor,

    /// Show the effective configuration
    Config,
}

#[derive(clap::Args, Clone, Debug)]
pub struct RunOptions {
    /// Audio bitrate in kbps [default: 320, or the config value]
    #[arg(short, long, value_parser = parse_bitrate)]
    pub bitrate: Option<String>,

    /// Skip audio volume normalization
    #[arg(long)]
    pub no_normalize: bool,

    /// Longest allowed track in minutes [default: 79, or the config value]
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_minutes: Option<u32>,

    /// Output directory [default: `musique` next to the executable]
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Digits, optionally followed by `k`/`K`; stored without the suffix
fn parse_bitrate(value: &str) -> Result<String, String> {
    let digits = value.trim().trim_end_matches(['k', 'K']);
    match digits.parse::<u32>() {
        Ok(kbps) if kbps > 0 => Ok(kbps.to_string()),
        _ => Err(format!("invalid bitrate '{}': expected kbps such as 320", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["ytmp3", "https://www.youtube.com/playlist?list=PL1"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.url.as_deref(), Some("https://www.youtube.com/playlist?list=PL1"));
        assert_eq!(cli.options.bitrate, None);
        assert!(!cli.options.no_normalize);
        assert_eq!(cli.options.max_minutes, None);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "ytmp3",
            "-b",
            "192",
            "--no-normalize",
            "--max-minutes",
            "74",
            "https://www.youtube.com/watch?v=abc",
        ]);
        assert_eq!(cli.options.bitrate.as_deref(), Some("192"));
        assert!(cli.options.no_normalize);
        assert_eq!(cli.options.max_minutes, Some(74));
    }

    #[test]
    fn test_zero_max_minutes_rejected() {
        assert!(Cli::try_parse_from(["ytmp3", "--max-minutes", "0", "url"]).is_err());
    }

    #[test]
    fn test_bitrate_parsing() {
        assert_eq!(parse_bitrate("320").unwrap(), "320");
        assert_eq!(parse_bitrate("128k").unwrap(), "128");
        assert!(parse_bitrate("0").is_err());
        assert!(parse_bitrate("loud").is_err());
    }

    #[test]
    fn test_subcommand() {
        let cli = Cli::parse_from(["ytmp3", "doctor"]);
        assert!(matches!(cli.command, Some(Commands::Doctor)));
    }

    #[test]
    fn test_cli_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
