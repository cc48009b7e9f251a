use adaapd::cli::commands;
use adaapd::cli::{Cli, Commands};
use adaapd::{Settings, logging};
use anyhow::anyhow;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let mut settings = loaded.map_err(|e| anyhow!("Configuration error: {e}"))?;

    if let Some(level) = cli.verbosity_level() {
        settings.logging.default = level.to_string();
    }
    logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { force } => commands::init::run_init(force),
        Commands::Config => commands::init::run_config(&settings),
        Commands::Watch(args) => commands::watch::run(&settings, args).await,
    }
}
