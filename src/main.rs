//! Relaychat - End-to-end encrypted chat over a relay
//!
//! A CLI client: connects to a relay over WebSocket, announces a display
//! name, and exchanges encrypted messages with other participants.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{ChatCommand, CommandExecutor, ConfigCommand, LoadedConfig};

/// Relaychat - End-to-end encrypted chat over a relay
///
/// Keys are generated per connection and never leave this process.
/// The relay only sees encrypted envelopes and the list of who is online.
#[derive(Parser)]
#[command(name = "relaychat")]
#[command(version)]
#[command(about = "End-to-end encrypted chat over a broadcast relay")]
#[command(long_about = None)]
struct Cli {
    /// Path to the config file (default: <config dir>/relaychat/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a relay and start chatting
    Chat(ChatCommand),

    /// Show the effective configuration
    Config(ConfigCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "relaychat=debug"
    } else {
        "relaychat=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

    let loaded = LoadedConfig::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Chat(cmd) => cmd.execute(&loaded),
        Commands::Config(cmd) => cmd.execute(&loaded),
    }
}
