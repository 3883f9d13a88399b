//! ClipMirror - clipboard history daemon with peer mirroring
//!
//! This is the main entry point for the ClipMirror daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipmirror::clipboard::SystemClipboard;
use clipmirror::coordinator::Coordinator;
use clipmirror::history::HistoryStore;
use clipmirror::sync::SessionBus;
use clipmirror::Config;

#[derive(Parser)]
#[command(name = "clipmirror", version, about = "Clipboard history daemon with peer mirroring")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (default)
    Run,
    /// List the persisted history, newest first
    History,
    /// Clear the persisted history
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // Initialize logging
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("clipmirror={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::History => list_history(config).await,
        Command::Clear => clear_history(config).await,
    }
}

async fn run(config: Config) -> Result<()> {
    info!("ClipMirror v{}", clipmirror::VERSION);

    let bus = Arc::new(SessionBus::connect().await?);
    let clipboard = Arc::new(SystemClipboard::new());
    let (mut coordinator, mut channels) = Coordinator::new(config, bus, clipboard).await?;
    coordinator.run(&mut channels).await?;
    Ok(())
}

async fn list_history(config: Config) -> Result<()> {
    let store = load_store(&config).await?;
    if store.is_empty() {
        println!("history is empty");
        return Ok(());
    }
    for (i, entry) in store.entries().iter().rev().enumerate() {
        println!("{:>3}  {}", i, entry.preview(config.history.preview_length));
    }
    Ok(())
}

async fn clear_history(config: Config) -> Result<()> {
    let mut store = load_store(&config).await?;
    let count = store.len();
    store.clear().await;
    store.flush_now().await;
    println!("cleared {count} history entries");
    Ok(())
}

async fn load_store(config: &Config) -> Result<HistoryStore> {
    Ok(HistoryStore::load(
        config.cache_root(),
        config.history.max_entries,
        config.history.cache_size_mb,
    )
    .await?)
}
