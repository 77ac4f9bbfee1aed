// ABOUTME: Entry point for sleeptrack: a local sleep session tracker.
// ABOUTME: Parses CLI args, loads config, sets up logging, and runs one command.

use clap::Parser;

use sleeptrack::app::{App, init_logging};
use sleeptrack::cli::Cli;
use sleeptrack::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = Config::load()?;
    init_logging(&config.logging);

    App::new(config).run(cli.command()).await
}
