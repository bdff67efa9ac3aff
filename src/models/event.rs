//! Client-side discovery events delivered on the `start_sync` channel.

use serde::Serialize;

use crate::models::port::Port;

/// Kind of a discovery [`Event`].
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A port appeared.
    Add,
    /// A port disappeared.
    Remove,
    /// Delivery on this channel has ended; the channel closes right after.
    Stop,
}

/// One event received from a discovery in sync mode.
///
/// `Stop` events are never sent by the discovery itself: the client
/// synthesizes one whenever it retires an event channel.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Event {
    /// What happened.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Subject port; `None` for [`EventKind::Stop`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<Port>,
    /// Identifier of the client that produced the event.
    pub discovery_id: String,
}

impl Event {
    /// A port-added event.
    #[must_use]
    pub fn add(port: Port, discovery_id: &str) -> Self {
        Self {
            kind: EventKind::Add,
            port: Some(port),
            discovery_id: discovery_id.to_owned(),
        }
    }

    /// A port-removed event.
    #[must_use]
    pub fn remove(port: Port, discovery_id: &str) -> Self {
        Self {
            kind: EventKind::Remove,
            port: Some(port),
            discovery_id: discovery_id.to_owned(),
        }
    }

    /// The terminal event of a channel.
    #[must_use]
    pub fn stop(discovery_id: &str) -> Self {
        Self {
            kind: EventKind::Stop,
            port: None,
            discovery_id: discovery_id.to_owned(),
        }
    }
}
