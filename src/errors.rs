//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all protocol failure modes.
///
/// Every variant carries a pre-rendered message so the error can be cloned
/// and handed to every waiter that observes a dead discovery stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or pipe I/O failure.
    Io(String),
    /// The discovery stream ended or could not be read or written.
    Transport(String),
    /// An envelope was malformed or did not match the command just issued.
    Protocol(String),
    /// The discovery answered a command with `error: true`.
    Command(String),
    /// No reply arrived within the command deadline.
    Timeout(String),
    /// A discovery implementation reported a failure (server side).
    Discovery(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Command(msg) => write!(f, "command failed: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Discovery(msg) => write!(f, "discovery: {msg}"),
        }
    }
}

impl AppError {
    /// The message carried by the error, without its category prefix.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Config(msg)
            | Self::Io(msg)
            | Self::Transport(msg)
            | Self::Protocol(msg)
            | Self::Command(msg)
            | Self::Timeout(msg)
            | Self::Discovery(msg) => msg,
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("malformed envelope: {err}"))
    }
}
