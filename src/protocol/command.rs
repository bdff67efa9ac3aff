//! Text commands sent from the controller to a discovery.
//!
//! Each command is a single ASCII line:
//!
//! ```text
//! HELLO 1 "pluggable-discovery my-tool/1.0"
//! START
//! STOP
//! START_SYNC
//! LIST
//! QUIT
//! ```

use std::fmt;
use std::str::FromStr;

use crate::AppError;

/// Highest protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 1;

/// A controller → discovery command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Handshake announcing the protocol version and the caller's agent string.
    Hello {
        /// Requested protocol version.
        version: u32,
        /// Free-form `<client-id> <user-agent>` string.
        user_agent: String,
    },
    /// Start discovery in polling mode.
    Start,
    /// Stop discovery (polling or sync).
    Stop,
    /// Start discovery in event mode.
    StartSync,
    /// Request the current port list.
    List,
    /// Terminate the discovery.
    Quit,
}

impl Command {
    /// Upper-case verb as written on the wire.
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "HELLO",
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::StartSync => "START_SYNC",
            Self::List => "LIST",
            Self::Quit => "QUIT",
        }
    }

    /// Event type of the envelope that answers this command.
    #[must_use]
    pub fn reply_type(&self) -> &'static str {
        use crate::models::message::event_type;

        match self {
            Self::Hello { .. } => event_type::HELLO,
            Self::Start => event_type::START,
            Self::Stop => event_type::STOP,
            Self::StartSync => event_type::START_SYNC,
            Self::List => event_type::LIST,
            Self::Quit => event_type::QUIT,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hello {
                version,
                user_agent,
            } => write!(f, "HELLO {version} \"{user_agent}\""),
            other => f.write_str(other.verb()),
        }
    }
}

/// Why a command line could not be parsed.
///
/// Carries the lower-cased verb so the error reply can be tagged with the
/// event type of the command that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCommandError {
    /// Lower-cased verb of the offending line.
    pub event_type: String,
    /// Human-readable reason.
    pub message: String,
}

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.event_type, self.message)
    }
}

impl std::error::Error for ParseCommandError {}

impl From<ParseCommandError> for AppError {
    fn from(err: ParseCommandError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(v, r)| (v, r.trim()));
        let fail = |message: String| ParseCommandError {
            event_type: verb.to_ascii_lowercase(),
            message,
        };

        let simple = |cmd: Self| {
            if rest.is_empty() {
                Ok(cmd)
            } else {
                Err(fail(format!("Invalid {verb} command: unexpected arguments")))
            }
        };

        match verb.to_ascii_uppercase().as_str() {
            "HELLO" => {
                parse_hello(rest).map_err(|reason| fail(format!("Invalid HELLO command: {reason}")))
            }
            "START" => simple(Self::Start),
            "STOP" => simple(Self::Stop),
            "START_SYNC" => simple(Self::StartSync),
            "LIST" => simple(Self::List),
            "QUIT" => simple(Self::Quit),
            _ => Err(fail(format!("Command {verb} not supported"))),
        }
    }
}

/// Parse the `<version> "<agent>"` tail of a HELLO line.
fn parse_hello(args: &str) -> std::result::Result<Command, String> {
    let (version, agent) = args
        .split_once(char::is_whitespace)
        .ok_or_else(|| "expected a version and a quoted user agent".to_owned())?;

    let version: u32 = version
        .parse()
        .map_err(|_| format!("invalid protocol version '{version}'"))?;

    let agent = agent.trim();
    let user_agent = agent
        .strip_prefix('"')
        .and_then(|a| a.strip_suffix('"'))
        .ok_or_else(|| "user agent must be double-quoted".to_owned())?;

    Ok(Command::Hello {
        version,
        user_agent: user_agent.to_owned(),
    })
}
