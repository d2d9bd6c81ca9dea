//! Config command - show or initialize the configuration file.

use anyhow::{Context, Result};
use clap::Args;

use super::{CommandExecutor, LoadedConfig};

/// Show the effective configuration and where it comes from.
#[derive(Args, Debug)]
pub struct ConfigCommand {
    /// Write the current configuration to the config file if none exists
    #[arg(long)]
    pub init: bool,
}

impl CommandExecutor for ConfigCommand {
    fn execute(&self, loaded: &LoadedConfig) -> Result<()> {
        if self.init {
            if loaded.from_file {
                println!("Config file already exists: {}", loaded.path.display());
            } else {
                loaded
                    .config
                    .save(&loaded.path)
                    .with_context(|| format!("Failed to write {}", loaded.path.display()))?;
                println!("Wrote {}", loaded.path.display());
            }
            return Ok(());
        }

        let source = if loaded.from_file {
            "file"
        } else {
            "defaults, file not found"
        };
        println!("# {} ({})", loaded.path.display(), source);
        let rendered =
            toml::to_string_pretty(&loaded.config).context("Failed to render configuration")?;
        print!("{}", rendered);
        Ok(())
    }
}
