//! Pluggable discovery abstraction used by the [`Server`](crate::server::Server).
//!
//! A [`Discovery`] knows *how* to find ports of one kind. The server owns the
//! protocol: it calls into the implementation for each command and receives
//! port changes back as [`SyncEvent`] messages through a [`SyncSender`]
//! rather than through callbacks, so that every outbound envelope is written
//! by the server's single dispatch loop.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::models::port::Port;
use crate::Result;

/// Boxed future returned by [`Discovery`] methods.
pub type DiscoveryFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Message pushed by a discovery implementation while a session is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A port appeared.
    PortAdded(Port),
    /// A port disappeared.
    PortRemoved(Port),
    /// The implementation cannot continue; the session ends.
    Failed(String),
}

/// Handle given to [`Discovery::start_sync`] for reporting port changes.
///
/// Cheap to clone. Every method returns `false` once the server has ended
/// the session (after `STOP`, `QUIT`, or a new `START_SYNC`), which is the
/// implementation's cue to stop emitting.
#[derive(Debug, Clone)]
pub struct SyncSender {
    tx: mpsc::Sender<SyncEvent>,
}

impl SyncSender {
    pub(crate) fn new(tx: mpsc::Sender<SyncEvent>) -> Self {
        Self { tx }
    }

    /// Report a new port.
    pub async fn port_added(&self, port: Port) -> bool {
        self.send(SyncEvent::PortAdded(port)).await
    }

    /// Report a port that went away.
    pub async fn port_removed(&self, port: Port) -> bool {
        self.send(SyncEvent::PortRemoved(port)).await
    }

    /// Report an unrecoverable failure; the server ends the session.
    pub async fn fail(&self, message: impl Into<String>) -> bool {
        self.send(SyncEvent::Failed(message.into())).await
    }

    /// Whether the server has ended this session.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Wait until the server ends this session.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    async fn send(&self, event: SyncEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Port discovery implementation driven by the protocol server.
///
/// Methods return boxed futures so the trait stays object-safe and usable
/// as `Box<dyn Discovery>`.
pub trait Discovery: Send {
    /// Handshake: accept or reject the controller.
    ///
    /// # Errors
    ///
    /// Any error is reported to the controller as a failed `hello`.
    fn hello(&mut self, user_agent: &str, protocol_version: u32) -> DiscoveryFuture<'_, Result<()>>;

    /// Begin reporting ports through `events` until [`Discovery::stop`].
    ///
    /// Must return promptly: emission happens in the background (for example
    /// a spawned task owning a clone of `events`). An initial burst of
    /// [`SyncEvent::PortAdded`] for already-present ports is expected.
    ///
    /// # Errors
    ///
    /// Any error is reported to the controller as a failed `start_sync`
    /// (or `start`).
    fn start_sync(&mut self, events: SyncSender) -> DiscoveryFuture<'_, Result<()>>;

    /// Halt any in-flight emission and release resources.
    ///
    /// # Errors
    ///
    /// Any error is reported to the controller as a failed `stop`.
    fn stop(&mut self) -> DiscoveryFuture<'_, Result<()>>;

    /// Final teardown before the process exits.
    fn quit(&mut self) -> DiscoveryFuture<'_, ()>;
}

impl<D: Discovery + ?Sized> Discovery for Box<D> {
    fn hello(&mut self, user_agent: &str, protocol_version: u32) -> DiscoveryFuture<'_, Result<()>> {
        (**self).hello(user_agent, protocol_version)
    }

    fn start_sync(&mut self, events: SyncSender) -> DiscoveryFuture<'_, Result<()>> {
        (**self).start_sync(events)
    }

    fn stop(&mut self) -> DiscoveryFuture<'_, Result<()>> {
        (**self).stop()
    }

    fn quit(&mut self) -> DiscoveryFuture<'_, ()> {
        (**self).quit()
    }
}
