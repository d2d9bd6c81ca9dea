//! Chat configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chat::error::ChatError;

/// Default relay address.
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:3000";

/// Default idle timeout in seconds (0 disables it).
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 0;

/// Default maximum message length in characters.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 4096;

/// Default capacity of the consumer event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Default capacity of the command channel into the dispatch loop.
pub const DEFAULT_COMMAND_BUFFER: usize = 64;

/// Configuration for a chat client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChatConfig {
    /// Relay WebSocket URL.
    pub relay_url: String,

    /// Close the session when nothing arrives for this many seconds.
    pub idle_timeout_secs: u64,

    /// Maximum outbound message length in characters.
    pub max_message_len: usize,

    /// Events buffered for the consumer before new ones are dropped.
    pub event_buffer: usize,

    /// Commands buffered for the dispatch loop.
    pub command_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            event_buffer: DEFAULT_EVENT_BUFFER,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

impl ChatConfig {
    /// Load configuration from the default location.
    ///
    /// Returns the defaults if the file doesn't exist.
    pub fn load_default() -> Result<Self, ChatError> {
        Self::load(&Self::config_path()?)
    }

    /// Load configuration from `path`, falling back to defaults if it is missing.
    pub fn load(path: &Path) -> Result<Self, ChatError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: ChatConfig = toml::from_str(&content)
            .map_err(|e| ChatError::ConfigError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ChatError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ChatError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Path of the default configuration file.
    pub fn config_path() -> Result<PathBuf, ChatError> {
        dirs::config_dir()
            .map(|dir| dir.join("relaychat").join("config.toml"))
            .ok_or_else(|| ChatError::ConfigError("no config directory".to_string()))
    }

    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.relay_url.trim().is_empty() {
            return Err(ChatError::ConfigError("relay_url is empty".to_string()));
        }
        if self.max_message_len == 0 {
            return Err(ChatError::ConfigError(
                "max_message_len must be positive".to_string(),
            ));
        }
        if self.event_buffer == 0 || self.command_buffer == 0 {
            return Err(ChatError::ConfigError(
                "channel buffers must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Idle timeout, or `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Override the relay URL.
    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = url.into();
        self
    }

    /// Override the idle timeout.
    pub fn with_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ChatConfig::default();
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
        assert_eq!(config.idle_timeout_secs, 0);
        assert_eq!(config.max_message_len, DEFAULT_MAX_MESSAGE_LEN);
        assert_eq!(config.event_buffer, DEFAULT_EVENT_BUFFER);
        assert_eq!(config.command_buffer, DEFAULT_COMMAND_BUFFER);
        assert!(config.idle_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = ChatConfig::load(&temp.path().join("absent.toml")).unwrap();
        assert_eq!(config, ChatConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let config = ChatConfig::default()
            .with_relay_url("ws://relay.example:9000")
            .with_idle_timeout_secs(30);
        config.save(&path).unwrap();

        let loaded = ChatConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.idle_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "relay_url = \"ws://10.0.0.1:3000\"\n").unwrap();

        let config = ChatConfig::load(&path).unwrap();
        assert_eq!(config.relay_url, "ws://10.0.0.1:3000");
        assert_eq!(config.max_message_len, DEFAULT_MAX_MESSAGE_LEN);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_message_len = 0\n").unwrap();

        assert!(matches!(
            ChatConfig::load(&path),
            Err(ChatError::ConfigError(_))
        ));

        let config = ChatConfig {
            event_buffer: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unparseable_file_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "idle_timeout_secs = \"soon\"\n").unwrap();

        let err = ChatConfig::load(&path).unwrap_err();
        assert!(matches!(err, ChatError::ConfigError(ref msg) if msg.contains("config.toml")));
    }
}
