//! Consensus tiers - tiered mention consensus alerts for Solana token mints

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use consensus_tiers::cli::commands;
use consensus_tiers::config::Config;

/// Consensus tiers - social consensus and market confirmation alerts
#[derive(Parser)]
#[command(name = "consensus-tiers")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine; mentions are read from stdin
    Run {
        /// Log alerts instead of delivering them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show current configuration (secrets masked)
    ShowConfig,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("consensus_tiers=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);
    if json {
        builder.json().init();
    } else {
        builder.with_file(true).with_line_number(true).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let loaded = Config::load(&cli.config);
    init_tracing(loaded.as_ref().map(|c| c.logging.json).unwrap_or(false))?;

    let config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { dry_run } => commands::start(&config, dry_run).await,
        Commands::ShowConfig => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
