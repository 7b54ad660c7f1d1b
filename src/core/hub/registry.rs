// src/core/hub/registry.rs

//! The live-connection registry, owned exclusively by the hub's event loop.
//!
//! All mutation happens on the loop task; confinement to that single task is
//! the registry's only synchronization mechanism.

use crate::core::protocol::ConnectionId;
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// What became of a relay attempt.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum RelayOutcome {
    Delivered,
    /// The destination id is not registered; the packet was dropped.
    UnknownTarget,
    /// The destination's queue was full or closed; the connection was evicted.
    Evicted,
}

/// Maps each live connection id to the sending side of its outbound queue.
///
/// Dropping an entry drops the sole strong sender of that queue, which closes
/// it and drives the owning connection's write pump through its shutdown path.
#[derive(Default)]
pub(super) struct Registry {
    connections: HashMap<ConnectionId, mpsc::Sender<Bytes>>,
}

impl Registry {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn len(&self) -> usize {
        self.connections.len()
    }

    pub(super) fn register(&mut self, id: ConnectionId, outbound: mpsc::Sender<Bytes>) {
        self.connections.insert(id, outbound);
    }

    /// Removes a connection, closing its outbound queue. Returns whether the
    /// id was present, so a second unregister for the same id is a no-op.
    pub(super) fn unregister(&mut self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    /// Hands one copy of `message` to every registered connection. A
    /// connection whose queue cannot take the message is evicted on the spot
    /// rather than blocking the loop; the evicted ids are returned.
    pub(super) fn broadcast(&mut self, message: &Bytes) -> Vec<ConnectionId> {
        let mut evicted = Vec::new();
        self.connections.retain(|id, outbound| {
            if outbound.try_send(message.clone()).is_ok() {
                true
            } else {
                evicted.push(*id);
                false
            }
        });
        evicted
    }

    /// Hands `message` to exactly one connection.
    pub(super) fn relay(&mut self, to: &ConnectionId, message: &Bytes) -> RelayOutcome {
        let Some(outbound) = self.connections.get(to) else {
            return RelayOutcome::UnknownTarget;
        };
        if outbound.try_send(message.clone()).is_ok() {
            RelayOutcome::Delivered
        } else {
            self.connections.remove(to);
            RelayOutcome::Evicted
        }
    }

    /// Drops every entry, closing every outbound queue.
    pub(super) fn clear(&mut self) {
        self.connections.clear();
    }
}
