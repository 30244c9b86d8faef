//! CLI entry point for language101.

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info, warn};

mod app;
mod app_config;
mod cli;

use app::settings::{default_log_filter, resolve_settings};
use app_config::load_default_file_config;
use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // A broken config file is reported after logging is up
    let loaded = load_default_file_config();
    let file_config = loaded
        .as_ref()
        .ok()
        .and_then(|loaded| loaded.config.as_ref());

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config verbosity > info
    let default_level = default_log_filter(&args, file_config);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let loaded = loaded?;
    debug!(config_path = ?loaded.path, config = ?loaded.config, "configuration loaded");
    info!("language101 starting");

    let settings = resolve_settings(&args, loaded.config.as_ref())?;
    let summary = app::runtime::run(settings).await?;

    if summary.failed > 0 {
        warn!(
            failed = summary.failed,
            "some lessons failed; run again to retry them"
        );
    }
    Ok(())
}
