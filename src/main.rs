//! tsltp - trailing stop-loss and take-profit for 3Commas DCA deals
//!
//! # WARNING
//! - This tool changes stop-loss and take-profit of live deals.
//! - Stop-losses are set with polling, fast moves can pass them between checks.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use tsl_tp_bot::cli::commands;
use tsl_tp_bot::config::{config_path, Config};

/// Trailing stop-loss and take-profit monitor
#[derive(Parser)]
#[command(name = "tsltp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the config file and deal database
    #[arg(short, long, default_value = ".", env = "TSLTP_DATADIR")]
    datadir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start monitoring
    Start,

    /// Run a single check cycle and exit
    Once,

    /// Show deals whose stop-loss is being trailed
    Status,

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.datadir)
        .with_context(|| format!("Cannot create data directory '{}'", cli.datadir.display()))?;
    let path = config_path(&cli.datadir);

    // Initialize tracing
    let level = if Config::debug_requested(&path) {
        "tsl_tp_bot=debug"
    } else {
        "tsl_tp_bot=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();

    // Load configuration, first run only writes an example
    let config = match Config::load_or_create(&path) {
        Ok(Some(cfg)) => cfg,
        Ok(None) => return Ok(()),
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Loaded configuration: {} group(s), {} bot(s)",
        config.groups.len(),
        config.bot_count()
    );

    let result = match cli.command {
        Commands::Start => commands::start(&cli.datadir, &config).await,
        Commands::Once => commands::once(&cli.datadir, &config).await,
        Commands::Status => commands::status(&cli.datadir, &config).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
