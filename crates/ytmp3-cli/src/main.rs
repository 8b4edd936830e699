mod args;
mod commands;

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use args::{Cli, Commands};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress bars carry the normal output; logs are opt-in
    let filter = match cli.verbose {
        0 => "ytmp3=warn",
        1 => "ytmp3=info",
        2 => "ytmp3=debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let result = match cli.command {
        Some(Commands::Doctor) => commands::doctor::run(cli.config.as_deref()).await,
        Some(Commands::Config) => commands::config::run(cli.config.as_deref()).await,
        None => match cli.url {
            Some(url) => commands::run::run(&url, &cli.options, cli.config.as_deref()).await,
            None => {
                // No URL, print help
                use clap::CommandFactory;
                let _ = Cli::command().print_help();
                println!();
                return ExitCode::FAILURE;
            }
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\nERROR: {}", e);
            ExitCode::FAILURE
        }
    }
}
