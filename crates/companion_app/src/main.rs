mod cli;
mod commands;
mod config;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use companion_engine::ensure_writable_dir;
use companion_logging::companion_warn;

use crate::cli::Cli;
use crate::commands::Session;
use crate::config::{AppConfig, CONFIG_FILENAME};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    ensure_writable_dir(&cli.data_dir)
        .with_context(|| format!("data directory {:?} is not usable", cli.data_dir))?;

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.data_dir.join(CONFIG_FILENAME));
    let (config, config_error) = match AppConfig::try_load(&config_path) {
        Ok(config) => (config.unwrap_or_default(), None),
        Err(err) => (AppConfig::default(), Some(err)),
    };
    logging::initialize(config.log_destination, config.level(), &cli.data_dir);
    if let Some(err) = config_error {
        companion_warn!("{}; using default configuration", err);
        eprintln!("Warning: {err}; using default configuration");
    }

    let session = Session::open(&config, &cli.data_dir)?;
    let outcome = session.run(cli.command).await;
    session.shutdown();
    outcome
}
