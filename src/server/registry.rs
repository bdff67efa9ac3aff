//! Live port registry maintained by the server.

use std::collections::HashMap;

use crate::models::port::{Port, PortKey};

/// Ports currently reported by the discovery, keyed by `(address, protocol)`.
///
/// Snapshots list ports in the order they were first added. Re-adding a known
/// port refreshes its metadata without moving it.
#[derive(Debug, Default)]
pub struct PortRegistry {
    index: HashMap<PortKey, usize>,
    ports: Vec<Port>,
}

impl PortRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh `port`. Returns `true` if it was not known before.
    pub fn add(&mut self, port: Port) -> bool {
        let key = port.key();
        if let Some(&slot) = self.index.get(&key) {
            self.ports[slot] = port;
            return false;
        }
        self.index.insert(key, self.ports.len());
        self.ports.push(port);
        true
    }

    /// Remove the port matching `port`'s identity, returning the stored entry.
    pub fn remove(&mut self, port: &Port) -> Option<Port> {
        let slot = self.index.remove(&port.key())?;
        let removed = self.ports.remove(slot);
        for idx in self.index.values_mut() {
            if *idx > slot {
                *idx -= 1;
            }
        }
        Some(removed)
    }

    /// Current ports in first-seen order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Port> {
        self.ports.clone()
    }

    /// Number of registered ports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}
