//! Client state machine and event routing.
//!
//! [`StateMachine`] is the single owner of the client's protocol state, the
//! terminal error recorded by the decode loop, and the event channel routes.
//! All mutation goes through the named transition methods below; readers get
//! a copy through [`StateMachine::state`].
//!
//! Two locks are involved and they are never nested:
//!
//! - `status` (a `std` mutex) holds the state word and the terminal error.
//!   It is never held across an `.await`, so [`StateMachine::state`] never
//!   blocks on I/O.
//! - `route` (a tokio mutex) holds the active and staged event senders. It
//!   is never held while waiting for room in a consumer's channel: the
//!   decode loop copies the active sender out and then sends, racing the
//!   channel's retirement token. Retiring a channel cancels that token first,
//!   so no event lands after the final
//!   [`EventKind::Stop`](crate::models::EventKind::Stop), and the channel is
//!   closed even when its consumer has stopped reading.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::event::Event;
use crate::AppError;

/// How long a retired channel waits for room for its final stop event.
///
/// A consumer that is not draining its channel loses the stop event; the
/// channel is closed either way.
pub const STOP_EVENT_GRACE: Duration = Duration::from_millis(500);

/// Protocol state of a discovery client.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    /// No subprocess, or the subprocess stream has ended. Initial and terminal.
    Dead,
    /// Subprocess spawned, handshake not completed yet.
    Alive,
    /// Handshake done, discovery not started.
    Idling,
    /// Discovery started in polling mode.
    Running,
    /// Discovery streaming events.
    Syncing,
}

impl ClientState {
    /// Whether a subprocess is attached.
    #[must_use]
    pub fn is_live(self) -> bool {
        self != Self::Dead
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dead => "dead",
            Self::Alive => "alive",
            Self::Idling => "idling",
            Self::Running => "running",
            Self::Syncing => "syncing",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Status {
    state: ClientState,
    terminal_error: Option<AppError>,
}

#[derive(Debug)]
struct EventSink {
    tx: mpsc::Sender<Event>,
    retired: CancellationToken,
}

#[derive(Debug, Default)]
struct EventRoute {
    /// Channel currently receiving add/remove events.
    active: Option<EventSink>,
    /// Channel waiting for a successful `start_sync` reply to become active.
    staged: Option<mpsc::Sender<Event>>,
}

/// Explicit state machine shared between a client and its decode loop.
#[derive(Debug)]
pub struct StateMachine {
    discovery_id: String,
    status: Mutex<Status>,
    route: tokio::sync::Mutex<EventRoute>,
}

impl StateMachine {
    /// Create a machine in [`ClientState::Dead`].
    #[must_use]
    pub fn new(discovery_id: &str) -> Self {
        Self {
            discovery_id: discovery_id.to_owned(),
            status: Mutex::new(Status {
                state: ClientState::Dead,
                terminal_error: None,
            }),
            route: tokio::sync::Mutex::new(EventRoute::default()),
        }
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.lock_status().state
    }

    /// Error recorded when the decode loop ended, if it has.
    #[must_use]
    pub fn terminal_error(&self) -> Option<AppError> {
        self.lock_status().terminal_error.clone()
    }

    // ── State transitions ────────────────────────────────────────────────────

    /// Subprocess spawned and decode loop started.
    pub fn spawned(&self) {
        self.transition(|status| {
            status.state = ClientState::Alive;
            status.terminal_error = None;
        });
    }

    /// Handshake accepted.
    pub fn handshake_complete(&self) {
        self.set(ClientState::Idling);
    }

    /// `START` accepted.
    pub fn started(&self) {
        self.set(ClientState::Running);
    }

    /// `START_SYNC` accepted.
    pub fn syncing(&self) {
        self.set(ClientState::Syncing);
    }

    /// `STOP` accepted.
    pub fn stopped(&self) {
        self.set(ClientState::Idling);
    }

    /// Subprocess killed by the client.
    pub fn killed(&self) {
        self.set(ClientState::Dead);
    }

    /// Decode loop ended; record why.
    ///
    /// The first recorded error wins: a later kill does not overwrite the
    /// reason the stream died.
    pub fn stream_ended(&self, err: AppError) {
        self.transition(|status| {
            status.state = ClientState::Dead;
            if status.terminal_error.is_none() {
                status.terminal_error = Some(err);
            }
        });
    }

    /// Move to `next`. Only [`StateMachine::spawned`] leaves `Dead`.
    fn set(&self, next: ClientState) {
        self.transition(|status| {
            if status.state != ClientState::Dead {
                status.state = next;
            }
        });
    }

    fn transition(&self, apply: impl FnOnce(&mut Status)) {
        let mut status = self.lock_status();
        let before = status.state;
        apply(&mut status);
        if before != status.state {
            debug!(
                discovery_id = %self.discovery_id,
                from = %before,
                to = %status.state,
                "client state transition"
            );
        }
    }

    fn lock_status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Event routing ────────────────────────────────────────────────────────

    /// Stage `tx` to become the active event channel on the next successful
    /// `start_sync` reply, replacing any previously staged channel.
    pub async fn stage_events(&self, tx: mpsc::Sender<Event>) {
        self.route.lock().await.staged = Some(tx);
    }

    /// Forget the staged channel without activating it.
    pub async fn unstage_events(&self) {
        self.route.lock().await.staged = None;
    }

    /// Promote the staged channel, retiring the active one first.
    ///
    /// Called by the decode loop at the exact stream position of a successful
    /// `start_sync` reply. Returns whether a staged channel existed.
    pub async fn activate_staged_events(&self) -> bool {
        let mut route = self.route.lock().await;
        let Some(staged) = route.staged.take() else {
            return false;
        };
        let sink = EventSink {
            tx: staged,
            retired: CancellationToken::new(),
        };
        if let Some(old) = route.active.replace(sink) {
            self.retire(old).await;
        }
        true
    }

    /// Deliver `event` to the active channel, waiting while it is full.
    ///
    /// Events are dropped when no channel is registered, when its receiver
    /// has gone away, or when the channel is retired while waiting for room.
    pub async fn deliver(&self, event: Event) {
        let sink = {
            let route = self.route.lock().await;
            route
                .active
                .as_ref()
                .map(|sink| (sink.tx.clone(), sink.retired.clone()))
        };
        let Some((tx, retired)) = sink else {
            debug!(
                discovery_id = %self.discovery_id,
                kind = ?event.kind,
                "no event channel registered, discarding event"
            );
            return;
        };

        tokio::select! {
            biased;

            () = retired.cancelled() => {
                debug!(
                    discovery_id = %self.discovery_id,
                    "event channel retired while full, discarding event"
                );
            }
            sent = tx.send(event) => {
                if sent.is_err() {
                    debug!(
                        discovery_id = %self.discovery_id,
                        "event receiver dropped, discarding event"
                    );
                }
            }
        }
    }

    /// Retire the active channel (and drop any staged one).
    pub async fn close_events(&self) {
        let mut route = self.route.lock().await;
        route.staged = None;
        if let Some(old) = route.active.take() {
            self.retire(old).await;
        }
    }

    /// Cut off pending deliveries, push the synthetic stop event, and close
    /// the channel by dropping its sender.
    async fn retire(&self, sink: EventSink) {
        sink.retired.cancel();
        let stop = Event::stop(&self.discovery_id);
        if tokio::time::timeout(STOP_EVENT_GRACE, sink.tx.send(stop))
            .await
            .is_err()
        {
            warn!(
                discovery_id = %self.discovery_id,
                "event channel still full, closing it without a stop event"
            );
        }
        debug!(discovery_id = %self.discovery_id, "event channel closed");
    }
}
