//! Global configuration parsing and validation.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::client::SpawnConfig;
use crate::{AppError, Result};

/// Round-trip deadlines, in seconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Deadline for HELLO, START, STOP, LIST and `START_SYNC`.
    #[serde(default = "default_command_seconds")]
    pub command_seconds: u64,
    /// Deadline for the QUIT reply.
    #[serde(default = "default_quit_seconds")]
    pub quit_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_seconds: default_command_seconds(),
            quit_seconds: default_quit_seconds(),
        }
    }
}

fn default_command_seconds() -> u64 {
    10
}

fn default_quit_seconds() -> u64 {
    5
}

fn default_event_capacity() -> usize {
    16
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").into()
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// One discovery executable to drive.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DiscoveryConfig {
    /// Identifier stamped on the events of this discovery.
    pub id: String,
    /// Executable path or name looked up on `PATH`.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the child process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl DiscoveryConfig {
    /// Spawn parameters for this discovery.
    #[must_use]
    pub fn spawn_config(&self) -> SpawnConfig {
        SpawnConfig {
            program: self.command.clone(),
            args: self.args.clone(),
            working_dir: self.working_dir.clone(),
        }
    }
}

/// Global configuration parsed from `discovery.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Controller name: first word of the HELLO agent string.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Remainder of the HELLO agent string.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Capacity of each `start_sync` event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Round-trip deadlines.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Discoveries to run.
    #[serde(default)]
    pub discoveries: Vec<DiscoveryConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            user_agent: default_user_agent(),
            event_capacity: default_event_capacity(),
            timeouts: TimeoutConfig::default(),
            discoveries: Vec::new(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a configured discovery by id.
    #[must_use]
    pub fn discovery(&self, id: &str) -> Option<&DiscoveryConfig> {
        self.discoveries.iter().find(|d| d.id == id)
    }

    /// Check invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.timeouts.command_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.command_seconds must be greater than zero".into(),
            ));
        }

        if self.timeouts.quit_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.quit_seconds must be greater than zero".into(),
            ));
        }

        if self.event_capacity == 0 {
            return Err(AppError::Config(
                "event_capacity must be greater than zero".into(),
            ));
        }

        if self.client_name.trim().is_empty() || self.client_name.contains('"') {
            return Err(AppError::Config(
                "client_name must be non-empty and must not contain quotes".into(),
            ));
        }

        if self.user_agent.contains('"') {
            return Err(AppError::Config("user_agent must not contain quotes".into()));
        }

        let mut seen = HashSet::new();
        for discovery in &self.discoveries {
            if discovery.id.trim().is_empty() {
                return Err(AppError::Config("discovery id must not be empty".into()));
            }
            if discovery.command.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "discovery '{}' has an empty command",
                    discovery.id
                )));
            }
            if !seen.insert(discovery.id.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate discovery id '{}'",
                    discovery.id
                )));
            }
        }

        Ok(())
    }
}
