// src/main.rs
use clap::Parser;
use futures_recon::commands::{self, Cli};
use futures_recon::config::Config;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    };
    let mut config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // CLI verbosity overrides the configured level
    config.logging.level = cli.verbose.clone();
    if let Err(e) = config.init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    log::info!("futures_recon v{}", env!("CARGO_PKG_VERSION"));

    match commands::execute(&cli, &config).await {
        Ok(summary) => {
            // Per-account failures are logged, not fatal
            log::info!(
                "Done: {} processed, {} skipped, {} failed",
                summary.processed,
                summary.skipped,
                summary.failed
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Run aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}
