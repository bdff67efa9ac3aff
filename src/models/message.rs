//! Wire envelope exchanged on the discovery output stream.
//!
//! On the wire every message is one flat JSON object whose meaningful fields
//! depend on `eventType`:
//!
//! ```json
//! {"eventType":"hello","message":"OK","protocolVersion":1}
//! {"eventType":"list","ports":[{"address":"1","protocol":"dummy"}]}
//! {"eventType":"add","port":{"address":"1","protocol":"dummy"}}
//! {"eventType":"start_sync","error":true,"message":"device busy"}
//! ```
//!
//! [`Envelope`] mirrors that flat shape for serde. Consumers convert it into
//! [`Message`], which only carries the fields valid for its variant.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::port::Port;
use crate::{AppError, Result};

/// Event type tags used on the wire.
pub mod event_type {
    /// Handshake reply.
    pub const HELLO: &str = "hello";
    /// Reply to `START`.
    pub const START: &str = "start";
    /// Reply to `STOP`.
    pub const STOP: &str = "stop";
    /// Reply to `START_SYNC`; also tags asynchronous sync failures.
    pub const START_SYNC: &str = "start_sync";
    /// Reply to `LIST`.
    pub const LIST: &str = "list";
    /// Reply to `QUIT`.
    pub const QUIT: &str = "quit";
    /// Port appeared (sync mode only).
    pub const ADD: &str = "add";
    /// Port disappeared (sync mode only).
    pub const REMOVE: &str = "remove";
}

/// Flat wire representation of a discovery message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Envelope {
    /// Message tag; see [`event_type`].
    pub event_type: String,
    /// Status or error text.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Whether the command failed.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
    /// Protocol version, meaningful on `hello` only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<u32>,
    /// Port snapshot, meaningful on `list` only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<Port>>,
    /// Subject port, meaningful on `add` and `remove` only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<Port>,
}

/// Tagged view of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Successful handshake reply.
    Hello {
        /// Status text, normally `OK`.
        message: String,
        /// Protocol version the discovery speaks.
        protocol_version: u32,
    },
    /// Successful `list` reply.
    List {
        /// Ports in wire order.
        ports: Vec<Port>,
    },
    /// A port appeared.
    Add(Port),
    /// A port disappeared.
    Remove(Port),
    /// Plain acknowledgement (`start`, `stop`, `start_sync`, `quit`, …).
    Ack {
        /// Event type being acknowledged.
        event_type: String,
        /// Status text, normally `OK`.
        message: String,
    },
    /// Any envelope with `error: true`.
    Error {
        /// Event type of the failed command.
        event_type: String,
        /// Failure description.
        message: String,
    },
}

impl Message {
    /// Wire tag of this message.
    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            Self::Hello { .. } => event_type::HELLO,
            Self::List { .. } => event_type::LIST,
            Self::Add(_) => event_type::ADD,
            Self::Remove(_) => event_type::REMOVE,
            Self::Ack { event_type, .. } | Self::Error { event_type, .. } => event_type,
        }
    }

    /// Build a successful acknowledgement for `event_type`.
    #[must_use]
    pub fn ok(event_type: &str) -> Self {
        Self::Ack {
            event_type: event_type.to_owned(),
            message: "OK".to_owned(),
        }
    }

    /// Build an error reply for `event_type`.
    #[must_use]
    pub fn error(event_type: &str, message: impl Into<String>) -> Self {
        Self::Error {
            event_type: event_type.to_owned(),
            message: message.into(),
        }
    }

    /// Whether this message is a successful `OK` reply to `expected`.
    ///
    /// The status text is compared case-insensitively.
    #[must_use]
    pub fn is_ok_reply(&self, expected: &str) -> bool {
        match self {
            Self::Hello { message, .. } | Self::Ack { message, .. } => {
                self.event_type() == expected && message.eq_ignore_ascii_case("OK")
            }
            _ => false,
        }
    }
}

impl TryFrom<Envelope> for Message {
    type Error = AppError;

    /// Convert a flat envelope into its tagged form.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] when an `add` or `remove` envelope has
    /// no `port`.
    fn try_from(env: Envelope) -> Result<Self> {
        if env.error {
            return Ok(Self::Error {
                event_type: env.event_type,
                message: env.message,
            });
        }

        match env.event_type.as_str() {
            event_type::HELLO => Ok(Self::Hello {
                message: env.message,
                protocol_version: env.protocol_version.unwrap_or_default(),
            }),
            event_type::LIST => Ok(Self::List {
                ports: env.ports.unwrap_or_default(),
            }),
            event_type::ADD | event_type::REMOVE => {
                let port = env.port.ok_or_else(|| {
                    AppError::Protocol(format!(
                        "invalid '{}' message: missing port",
                        env.event_type
                    ))
                })?;
                if env.event_type == event_type::ADD {
                    Ok(Self::Add(port))
                } else {
                    Ok(Self::Remove(port))
                }
            }
            _ => Ok(Self::Ack {
                event_type: env.event_type,
                message: env.message,
            }),
        }
    }
}

impl From<Message> for Envelope {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Hello {
                message,
                protocol_version,
            } => Self {
                event_type: event_type::HELLO.to_owned(),
                message,
                protocol_version: Some(protocol_version),
                ..Self::default()
            },
            Message::List { ports } => Self {
                event_type: event_type::LIST.to_owned(),
                ports: Some(ports),
                ..Self::default()
            },
            Message::Add(port) => Self {
                event_type: event_type::ADD.to_owned(),
                port: Some(port),
                ..Self::default()
            },
            Message::Remove(port) => Self {
                event_type: event_type::REMOVE.to_owned(),
                port: Some(port.identity()),
                ..Self::default()
            },
            Message::Ack {
                event_type,
                message,
            } => Self {
                event_type,
                message,
                ..Self::default()
            },
            Message::Error {
                event_type,
                message,
            } => Self {
                event_type,
                message,
                error: true,
                ..Self::default()
            },
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type: {}", self.event_type())?;
        match self {
            Self::Hello {
                message,
                protocol_version,
            } => write!(f, ", message: {message}, protocol version: {protocol_version}"),
            Self::List { ports } => {
                let ports: Vec<String> = ports.iter().map(ToString::to_string).collect();
                write!(f, ", ports: [{}]", ports.join("; "))
            }
            Self::Add(port) | Self::Remove(port) => write!(f, ", port: {port}"),
            Self::Ack { message, .. } if message.is_empty() => Ok(()),
            Self::Ack { message, .. } => write!(f, ", message: {message}"),
            Self::Error { message, .. } => write!(f, ", error: {message}"),
        }
    }
}
