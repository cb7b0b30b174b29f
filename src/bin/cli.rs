//! walletwatch CLI
//!
//! Polls the configured wallets until interrupted, or with `--query N`
//! prints the latest N records per wallet and exits.

use std::path::PathBuf;

use clap::Parser;
use walletwatch::{config, error::Result, pipeline};

/// walletwatch - Wallet Activity Screener
#[derive(Parser, Debug)]
#[command(
    name = "walletwatch",
    version,
    about = "Screens wallet activity and forwards new transactions to bot chats"
)]
struct Cli {
    /// JSON blob: {"settings": {...}, "wallets": {"<address>": {"name": ..., "chat_id": ...}}}
    blob: Option<String>,

    /// TOML file with [settings] and [wallets] tables, overridden by the blob
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Print the latest N transactions per wallet and exit without notifying
    #[arg(long, value_name = "N", conflicts_with = "once")]
    query: Option<usize>,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    config::load_dotenv();

    log::info!("walletwatch starting...");

    let config = config::load_config(cli.blob.as_deref(), cli.config.as_deref())?;

    if let Some(count) = cli.query {
        return pipeline::run_query(&config, count).await;
    }

    if let Err(e) = config.validate() {
        log::error!("Config validation failed: {}", e);
        return Err(e);
    }

    pipeline::run_watcher(&config, cli.once).await?;

    log::info!("Done!");
    Ok(())
}
