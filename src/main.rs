mod auth;
mod cli;
mod config;
mod error;
mod jenkins;
mod output;
mod report;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use config::Config;
use log::info;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    output::print_banner();

    info!("Starting pipeline-report");
    let config = Config::load(cli.config_path())?;
    cli.execute(&config)?;

    Ok(())
}
