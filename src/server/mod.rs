//! Discovery-side protocol server.
//!
//! [`Server::run`] reads command lines from its input, drives a
//! [`Discovery`] implementation, and writes JSON envelopes to its output.
//! One loop multiplexes the two sources of output: command replies, and the
//! [`SyncEvent`]s pushed by the implementation during a session. Since that
//! loop is the only writer, envelopes never interleave.
//!
//! ## Sessions
//!
//! | Command      | Session mode | Implementation events become            |
//! |--------------|--------------|-----------------------------------------|
//! | `START`      | cached       | registry updates only (served by `LIST`)|
//! | `START_SYNC` | sync         | registry updates + `add`/`remove` sent  |
//!
//! Starting a session while another is active stops the previous one first.
//! `STOP` ends the session; the registry keeps its last contents so `LIST`
//! still answers from it.

pub mod discovery;
pub mod registry;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::models::message::{event_type, Envelope, Message};
use crate::protocol::codec::{CommandCodec, EnvelopeCodec};
use crate::protocol::command::{Command, PROTOCOL_VERSION};
use crate::{AppError, Result};

pub use discovery::{Discovery, DiscoveryFuture, SyncEvent, SyncSender};
pub use registry::PortRegistry;

/// Capacity of the channel carrying [`SyncEvent`]s into the server loop.
pub const SYNC_EVENT_CAPACITY: usize = 64;

/// How implementation events of the active session are surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionMode {
    /// Started with `START`: update the registry silently.
    Cached,
    /// Started with `START_SYNC`: also stream `add`/`remove` envelopes.
    Sync,
}

impl SessionMode {
    fn reply_type(self) -> &'static str {
        match self {
            Self::Cached => event_type::START,
            Self::Sync => event_type::START_SYNC,
        }
    }
}

#[derive(Debug)]
struct Session {
    mode: SessionMode,
    events: mpsc::Receiver<SyncEvent>,
}

/// Whether the loop keeps going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Protocol server wrapping one [`Discovery`] implementation.
pub struct Server<D> {
    discovery: D,
    registry: PortRegistry,
    initialized: bool,
    session: Option<Session>,
}

impl<D: Discovery> Server<D> {
    /// Wrap `discovery`; nothing runs until [`Server::run`].
    #[must_use]
    pub fn new(discovery: D) -> Self {
        Self {
            discovery,
            registry: PortRegistry::new(),
            initialized: false,
            session: None,
        }
    }

    /// Serve the protocol until `QUIT` or until `input` ends.
    ///
    /// Implementation failures are reported as `error: true` envelopes and
    /// never end the loop.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] when reading `input` or writing
    /// `output` fails.
    pub async fn run<R, W>(mut self, input: R, output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut commands = FramedRead::new(input, CommandCodec::new());
        let mut out = FramedWrite::new(output, EnvelopeCodec::new());
        info!("discovery server started");

        loop {
            tokio::select! {
                // Events already reported are applied before the next command.
                biased;

                event = next_sync_event(&mut self.session) => {
                    self.handle_sync_event(event, &mut out).await?;
                }
                line = commands.next() => match line {
                    None => {
                        info!("command input closed, shutting down");
                        self.end_session().await;
                        return Ok(());
                    }
                    Some(Err(err)) => {
                        error!(%err, "reading commands failed");
                        return Err(as_transport(err));
                    }
                    Some(Ok(Err(err))) => {
                        warn!(%err, "discarding unreadable command");
                        emit(&mut out, Message::error("command_error", err.detail())).await?;
                    }
                    Some(Ok(Ok(line))) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if self.dispatch(&line, &mut out).await? == Flow::Quit {
                            info!("discovery server quit");
                            return Ok(());
                        }
                    }
                },
            }
        }
    }

    /// Parse and execute one command line, writing its reply.
    async fn dispatch<W>(&mut self, line: &str, out: &mut FramedWrite<W, EnvelopeCodec>) -> Result<Flow>
    where
        W: AsyncWrite + Unpin,
    {
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(err) => {
                warn!(line, error = %err, "rejecting malformed command");
                emit(out, Message::error(&err.event_type, err.message)).await?;
                return Ok(Flow::Continue);
            }
        };
        debug!(%command, "received command");

        let reply_type = command.reply_type();
        if !self.initialized && !matches!(command, Command::Hello { .. } | Command::Quit) {
            emit(out, Message::error(reply_type, "Discovery not initialized")).await?;
            return Ok(Flow::Continue);
        }

        let (reply, flow) = match command {
            Command::Hello {
                version,
                user_agent,
            } => (self.hello(&user_agent, version).await, Flow::Continue),
            Command::Start => (self.start_session(SessionMode::Cached).await, Flow::Continue),
            Command::StartSync => (self.start_session(SessionMode::Sync).await, Flow::Continue),
            Command::Stop => (self.stop().await, Flow::Continue),
            Command::List => (
                Message::List {
                    ports: self.registry.snapshot(),
                },
                Flow::Continue,
            ),
            Command::Quit => {
                self.end_session().await;
                self.discovery.quit().await;
                (Message::ok(event_type::QUIT), Flow::Quit)
            }
        };

        emit(out, reply).await?;
        Ok(flow)
    }

    async fn hello(&mut self, user_agent: &str, version: u32) -> Message {
        if self.initialized {
            return Message::error(event_type::HELLO, "HELLO already called");
        }
        if version == 0 || version > PROTOCOL_VERSION {
            return Message::error(
                event_type::HELLO,
                format!("Unsupported protocol version {version}, supported version is {PROTOCOL_VERSION}"),
            );
        }
        if let Err(err) = self.discovery.hello(user_agent, version).await {
            return Message::error(event_type::HELLO, err.detail());
        }

        info!(user_agent, version, "handshake accepted");
        self.initialized = true;
        Message::Hello {
            message: "OK".to_owned(),
            protocol_version: PROTOCOL_VERSION,
        }
    }

    async fn start_session(&mut self, mode: SessionMode) -> Message {
        self.end_session().await;

        let (tx, events) = mpsc::channel(SYNC_EVENT_CAPACITY);
        if let Err(err) = self.discovery.start_sync(SyncSender::new(tx)).await {
            warn!(?mode, %err, "discovery refused to start");
            return Message::error(mode.reply_type(), err.detail());
        }

        self.registry = PortRegistry::new();
        self.session = Some(Session { mode, events });
        info!(?mode, "discovery session started");
        Message::ok(mode.reply_type())
    }

    async fn stop(&mut self) -> Message {
        self.session = None;
        match self.discovery.stop().await {
            Ok(()) => {
                info!("discovery session stopped");
                Message::ok(event_type::STOP)
            }
            Err(err) => Message::error(event_type::STOP, err.detail()),
        }
    }

    /// Drop the active session, if any, and tell the implementation to halt.
    async fn end_session(&mut self) {
        if self.session.take().is_some() {
            if let Err(err) = self.discovery.stop().await {
                warn!(%err, "stopping previous discovery session");
            }
        }
    }

    async fn handle_sync_event<W>(
        &mut self,
        event: Option<SyncEvent>,
        out: &mut FramedWrite<W, EnvelopeCodec>,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let Some(mode) = self.session.as_ref().map(|s| s.mode) else {
            return Ok(());
        };
        let streaming = mode == SessionMode::Sync;

        match event {
            Some(SyncEvent::PortAdded(port)) => {
                self.registry.add(port.clone());
                if streaming {
                    emit(out, Message::Add(port)).await?;
                }
            }
            Some(SyncEvent::PortRemoved(port)) => {
                self.registry.remove(&port);
                if streaming {
                    emit(out, Message::Remove(port)).await?;
                }
            }
            Some(SyncEvent::Failed(message)) => {
                error!(?mode, error = %message, "discovery session failed");
                self.session = None;
                if streaming {
                    emit(out, Message::error(event_type::START_SYNC, message)).await?;
                }
            }
            None => {
                debug!(?mode, "discovery closed its event stream");
                self.session = None;
            }
        }
        Ok(())
    }

    /// Ports currently held in the registry.
    #[must_use]
    pub fn registry(&self) -> &PortRegistry {
        &self.registry
    }
}

/// Next event of the active session; pending forever when there is none.
async fn next_sync_event(session: &mut Option<Session>) -> Option<SyncEvent> {
    match session {
        Some(session) => session.events.recv().await,
        None => std::future::pending().await,
    }
}

/// Serialize `message` to the output stream.
async fn emit<W>(out: &mut FramedWrite<W, EnvelopeCodec>, message: Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.send(Envelope::from(message)).await.map_err(as_transport)
}

fn as_transport(err: AppError) -> AppError {
    match err {
        AppError::Io(msg) => AppError::Transport(msg),
        other => other,
    }
}
