//! Controller-side discovery client.
//!
//! A [`Client`] owns one discovery subprocess. Every protocol verb is a
//! strictly sequential round trip: write one command line, then wait (with a
//! deadline) for the next non-event envelope. A background decode loop
//! ([`reader::run_decode_loop`]) reads the subprocess's stdout concurrently,
//! forwards `add`/`remove` events to the channel returned by
//! [`Client::start_sync`], and hands everything else to the waiting command.
//!
//! # Known limitation
//!
//! A command that times out leaves its reply in flight. If that reply arrives
//! later it is consumed by the *next* command, which then fails with an
//! "event out of sync" error. The protocol has no correlation IDs to avoid
//! this, so callers that hit a timeout should usually [`Client::quit`].
//!
//! # Example
//!
//! ```rust,ignore
//! use pluggable_discovery::client::{Client, ClientOptions, SpawnConfig};
//!
//! let spawn = SpawnConfig::from_argv(["serial-discovery"])?;
//! let client = Client::new("builtin:serial", spawn, ClientOptions::default());
//! client.run().await?;
//! let mut events = client.start_sync(16).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! client.quit().await;
//! ```

pub mod reader;
pub mod spawner;
pub mod state;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tracing::{error, info, warn};

use crate::config::GlobalConfig;
use crate::models::event::Event;
use crate::models::message::{event_type, Message};
use crate::models::port::Port;
use crate::protocol::codec::CommandCodec;
use crate::protocol::command::{Command, PROTOCOL_VERSION};
use crate::{AppError, Result};

pub use spawner::SpawnConfig;
pub use state::{ClientState, StateMachine};

/// Default deadline for a command round trip.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for the `QUIT` reply.
pub const DEFAULT_QUIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for a [`Client`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// First word of the HELLO agent string, naming the controller.
    pub client_name: String,
    /// Remainder of the HELLO agent string.
    pub user_agent: String,
    /// Deadline for HELLO, START, STOP, LIST and `START_SYNC`.
    pub command_timeout: Duration,
    /// Deadline for the QUIT reply.
    pub quit_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            client_name: env!("CARGO_PKG_NAME").to_owned(),
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            quit_timeout: DEFAULT_QUIT_TIMEOUT,
        }
    }
}

impl From<&GlobalConfig> for ClientOptions {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            client_name: config.client_name.clone(),
            user_agent: config.user_agent.clone(),
            command_timeout: Duration::from_secs(config.timeouts.command_seconds),
            quit_timeout: Duration::from_secs(config.timeouts.quit_seconds),
        }
    }
}

/// Live pipes and tasks of a spawned discovery.
struct Session {
    child: Child,
    commands: FramedWrite<ChildStdin, CommandCodec>,
    replies: mpsc::Receiver<Message>,
    decode_task: JoinHandle<()>,
}

/// Client for one pluggable discovery subprocess.
pub struct Client {
    id: String,
    spawn: SpawnConfig,
    options: ClientOptions,
    machine: Arc<StateMachine>,
    session: Mutex<Option<Session>>,
}

impl Client {
    /// Create a client in [`ClientState::Dead`]; nothing is spawned yet.
    #[must_use]
    pub fn new(id: impl Into<String>, spawn: SpawnConfig, options: ClientOptions) -> Self {
        let id = id.into();
        Self {
            machine: Arc::new(StateMachine::new(&id)),
            id,
            spawn,
            options,
            session: Mutex::new(None),
        }
    }

    /// Identifier of this discovery, stamped on every [`Event`].
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current protocol state. Never blocks on I/O.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.machine.state()
    }

    /// Agent string sent in the HELLO command.
    #[must_use]
    pub fn hello_agent(&self) -> String {
        format!("{} {}", self.options.client_name, self.options.user_agent)
    }

    /// Spawn the discovery and perform the HELLO handshake.
    ///
    /// Any process left over from a previous run is killed first. If the
    /// handshake fails the new process is killed too and the client stays
    /// [`ClientState::Dead`].
    ///
    /// # Errors
    ///
    /// - [`AppError::Transport`] if the process cannot be spawned or written.
    /// - [`AppError::Timeout`] if no reply arrives in time.
    /// - [`AppError::Protocol`] on an out-of-sync reply, a non-`OK` status,
    ///   or an unsupported protocol version.
    /// - [`AppError::Command`] if the discovery rejects the handshake.
    pub async fn run(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        if let Some(previous) = guard.take() {
            warn!(discovery_id = %self.id, "discarding previous discovery process");
            self.teardown(previous).await;
        }

        info!(discovery_id = %self.id, "starting discovery process");
        let process = spawner::spawn_discovery(&self.spawn, &self.id)?;

        let (reply_tx, replies) = mpsc::channel(1);
        self.machine.spawned();
        let decode_task = tokio::spawn(reader::run_decode_loop(
            self.id.clone(),
            process.stdout,
            Arc::clone(&self.machine),
            reply_tx,
        ));

        let session = guard.insert(Session {
            child: process.child,
            commands: FramedWrite::new(process.stdin, CommandCodec::new()),
            replies,
            decode_task,
        });

        match self.handshake(session).await {
            Ok(()) => {
                self.machine.handshake_complete();
                info!(discovery_id = %self.id, "discovery handshake complete");
                Ok(())
            }
            Err(err) => {
                error!(discovery_id = %self.id, %err, "discovery handshake failed, killing process");
                if let Some(session) = guard.take() {
                    self.teardown(session).await;
                }
                Err(err)
            }
        }
    }

    /// Start discovery in polling mode.
    ///
    /// # Errors
    ///
    /// See [`Client::run`]; also [`AppError::Transport`] if not running.
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = self.session_mut(&mut guard)?;
        let reply = self
            .round_trip(session, Command::Start, self.options.command_timeout)
            .await?;
        expect_ok(&reply, event_type::START)?;
        self.machine.started();
        Ok(())
    }

    /// Stop discovery.
    ///
    /// The current event channel, if any, is always retired (one synthetic
    /// stop event, then closed), whatever the outcome of the command.
    ///
    /// # Errors
    ///
    /// See [`Client::start`].
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        let result = match self.session_mut(&mut guard) {
            Ok(session) => self
                .round_trip(session, Command::Stop, self.options.command_timeout)
                .await
                .and_then(|reply| expect_ok(&reply, event_type::STOP)),
            Err(err) => Err(err),
        };
        self.machine.close_events().await;
        result?;
        self.machine.stopped();
        Ok(())
    }

    /// Request the ports currently known to the discovery, in wire order.
    ///
    /// # Errors
    ///
    /// See [`Client::start`].
    pub async fn list(&self) -> Result<Vec<Port>> {
        let mut guard = self.session.lock().await;
        let session = self.session_mut(&mut guard)?;
        let reply = self
            .round_trip(session, Command::List, self.options.command_timeout)
            .await?;
        check_reply(&reply, event_type::LIST)?;
        match reply {
            Message::List { ports } => Ok(ports),
            other => Err(AppError::Protocol(format!(
                "event out of sync, expected 'list', received '{}'",
                other.event_type()
            ))),
        }
    }

    /// Put the discovery in event mode and return the channel that receives
    /// its `add`/`remove` events.
    ///
    /// The channel holds up to `capacity` events (at least one). When it is
    /// full the decode loop waits, which also delays later command replies,
    /// so consume it promptly. Any previous event channel is closed after a
    /// final [`EventKind::Stop`](crate::models::EventKind::Stop) event.
    ///
    /// # Errors
    ///
    /// See [`Client::start`].
    pub async fn start_sync(&self, capacity: usize) -> Result<mpsc::Receiver<Event>> {
        let mut guard = self.session.lock().await;
        let session = self.session_mut(&mut guard)?;

        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.machine.stage_events(tx).await;

        let result = self
            .round_trip(session, Command::StartSync, self.options.command_timeout)
            .await
            .and_then(|reply| expect_ok(&reply, event_type::START_SYNC));

        match result {
            Ok(()) => {
                self.machine.syncing();
                Ok(rx)
            }
            Err(err) => {
                self.machine.unstage_events().await;
                Err(err)
            }
        }
    }

    /// Terminate the discovery.
    ///
    /// Sends `QUIT` and waits briefly for a reply, but failures there are
    /// only logged: the process is killed and reaped and the event channel
    /// is retired regardless. The client always ends [`ClientState::Dead`].
    pub async fn quit(&self) {
        let mut guard = self.session.lock().await;
        match guard.take() {
            Some(mut session) => {
                // Best effort: the process is killed below either way.
                let _ = self.send_command(&mut session, Command::Quit).await;
                if let Err(err) = self.wait_message(&mut session, self.options.quit_timeout).await {
                    error!(discovery_id = %self.id, %err, "quitting discovery");
                }
                self.teardown(session).await;
            }
            None => self.machine.close_events().await,
        }
        self.machine.killed();
    }

    // ── Private helpers ──────────────────────────────────────────────────────

    async fn handshake(&self, session: &mut Session) -> Result<()> {
        let hello = Command::Hello {
            version: PROTOCOL_VERSION,
            user_agent: self.hello_agent(),
        };
        let reply = self
            .round_trip(session, hello, self.options.command_timeout)
            .await?;
        expect_ok(&reply, event_type::HELLO)?;

        if let Message::Hello {
            protocol_version, ..
        } = reply
        {
            if protocol_version > PROTOCOL_VERSION {
                return Err(AppError::Protocol(format!(
                    "protocol version not supported: requested {PROTOCOL_VERSION}, got {protocol_version}"
                )));
            }
        }
        Ok(())
    }

    fn session_mut<'a>(&self, guard: &'a mut Option<Session>) -> Result<&'a mut Session> {
        guard
            .as_mut()
            .ok_or_else(|| AppError::Transport(format!("discovery {} is not running", self.id)))
    }

    async fn round_trip(
        &self,
        session: &mut Session,
        command: Command,
        timeout: Duration,
    ) -> Result<Message> {
        let verb = command.verb();
        self.send_command(session, command).await?;
        self.wait_message(session, timeout).await.map_err(|err| {
            warn!(discovery_id = %self.id, command = verb, %err, "no reply to command");
            err
        })
    }

    async fn send_command(&self, session: &mut Session, command: Command) -> Result<()> {
        info!(discovery_id = %self.id, %command, "sending command to discovery");
        session.commands.send(command).await.map_err(|err| match err {
            AppError::Io(msg) => AppError::Transport(format!("writing to discovery {}: {msg}", self.id)),
            other => other,
        })
    }

    async fn wait_message(&self, session: &mut Session, timeout: Duration) -> Result<Message> {
        match tokio::time::timeout(timeout, session.replies.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(self.machine.terminal_error().unwrap_or_else(|| {
                AppError::Transport(format!("discovery {} closed its output stream", self.id))
            })),
            Err(_elapsed) => Err(AppError::Timeout(format!(
                "timeout waiting for message from {} after {timeout:?}",
                self.id
            ))),
        }
    }

    /// Kill and reap the process, stop the decode loop, then retire the
    /// event channel.
    async fn teardown(&self, session: Session) {
        let Session {
            mut child,
            commands,
            replies,
            decode_task,
        } = session;
        drop(commands);
        drop(replies);

        info!(discovery_id = %self.id, "killing discovery process");
        // `Child::kill` also waits for the process to exit.
        if let Err(err) = child.kill().await {
            error!(discovery_id = %self.id, %err, "killing discovery process");
        }
        decode_task.abort();
        if let Err(err) = decode_task.await {
            if err.is_panic() {
                error!(discovery_id = %self.id, %err, "decode loop panicked");
            }
        }
        self.machine.close_events().await;
        self.machine.killed();
        info!(discovery_id = %self.id, "killed discovery process");
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("spawn", &self.spawn)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Fail unless `reply` answers `expected` without error.
fn check_reply(reply: &Message, expected: &str) -> Result<()> {
    if reply.event_type() != expected {
        return Err(AppError::Protocol(format!(
            "event out of sync, expected '{expected}', received '{}'",
            reply.event_type()
        )));
    }
    if let Message::Error { message, .. } = reply {
        return Err(AppError::Command(message.clone()));
    }
    Ok(())
}

/// Like [`check_reply`], and additionally require an `OK` status.
fn expect_ok(reply: &Message, expected: &str) -> Result<()> {
    check_reply(reply, expected)?;
    if reply.is_ok_reply(expected) {
        return Ok(());
    }
    let received = match reply {
        Message::Hello { message, .. } | Message::Ack { message, .. } => message.as_str(),
        _ => "",
    };
    Err(AppError::Protocol(format!(
        "communication out of sync, expected 'OK', received '{received}'"
    )))
}
