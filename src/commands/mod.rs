//! Command module - Strategy pattern for CLI commands.
//!
//! Each command is a separate module implementing the `CommandExecutor` trait.

mod chat;
mod config;

pub use chat::ChatCommand;
pub use config::ConfigCommand;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use relaychat::chat::ChatConfig;

/// Configuration resolved from the global `--config` flag.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// File the configuration was read from (or would be).
    pub path: PathBuf,
    /// Whether the file existed.
    pub from_file: bool,
    /// Effective configuration.
    pub config: ChatConfig,
}

impl LoadedConfig {
    /// Load from `path`, or from the default location when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => ChatConfig::config_path().context("Failed to locate config directory")?,
        };
        let config = ChatConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        Ok(Self {
            from_file: path.exists(),
            path,
            config,
        })
    }
}

/// Trait for command execution - Strategy pattern.
///
/// Each command struct holds its parsed arguments and implements
/// this trait to define its execution logic.
pub trait CommandExecutor {
    /// Executes the command with its parsed arguments.
    fn execute(&self, loaded: &LoadedConfig) -> Result<()>;
}
