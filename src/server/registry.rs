//! Connection registry
//!
//! Maps window ids to their live connection. Registering a second transport
//! under an id that is already taken moves the older one aside: it keeps
//! routing its own messages and is still counted until it closes, but
//! broadcasts and targeted sends go to the newest connection only.
//!
//! Attributes of a closed connection are kept under its id and handed to the
//! next connection that registers with the same id, so window geometry
//! survives a child restart.

use std::collections::HashMap;

use serde_json::Value;

use crate::ipc::{Connection, ConnectionId};

/// Table of active connections, owned by the supervisor
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Current connection per id
    entries: HashMap<ConnectionId, Connection>,
    /// Older transports displaced by a newer one with the same id
    shadowed: HashMap<u64, Connection>,
    /// Attributes left behind by closed connections
    retained: HashMap<ConnectionId, HashMap<String, Value>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its id, displacing any previous holder
    pub fn register(&mut self, mut connection: Connection) {
        let id = connection.id().clone();
        if let Some(attributes) = self.retained.remove(&id) {
            connection.inherit_attributes(attributes);
        }
        if let Some(previous) = self.entries.insert(id.clone(), connection) {
            tracing::debug!(window_id = %id, key = previous.key(), "Connection displaced by newer transport");
            self.shadowed.insert(previous.key(), previous);
        }
    }

    pub fn lookup(&self, id: &ConnectionId) -> Option<&Connection> {
        self.entries.get(id)
    }

    pub fn lookup_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        self.entries.get_mut(id)
    }

    /// Find any tracked connection, current or displaced, by transport key
    pub fn by_key_mut(&mut self, key: u64) -> Option<&mut Connection> {
        if let Some(connection) = self.shadowed.get_mut(&key) {
            return Some(connection);
        }
        self.entries.values_mut().find(|c| c.key() == key)
    }

    /// Remove the current connection for an id
    pub fn remove(&mut self, id: &ConnectionId) -> Option<Connection> {
        let mut connection = self.entries.remove(id)?;
        self.retained.insert(id.clone(), connection.take_attributes());
        Some(connection)
    }

    /// Remove whichever tracked connection owns a transport key
    pub fn remove_key(&mut self, key: u64) -> Option<Connection> {
        if let Some(connection) = self.shadowed.remove(&key) {
            return Some(connection);
        }
        let id = self
            .entries
            .iter()
            .find(|(_, c)| c.key() == key)
            .map(|(id, _)| id.clone())?;
        self.remove(&id)
    }

    /// Send an envelope to every registered connection
    ///
    /// Best effort: a failed send is logged and the rest still receive it.
    /// Returns the number of connections the message was queued for.
    pub fn broadcast_all(&self, kind: &str, data: &Value) -> usize {
        let mut delivered = 0;
        for connection in self.entries.values() {
            match connection.send(kind, data.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(window_id = %connection.id(), kind, error = %e, "Broadcast send failed");
                }
            }
        }
        delivered
    }

    /// Send an envelope to a subset of ids; unknown ids are skipped
    pub fn send_to(&self, ids: &[ConnectionId], kind: &str, data: &Value) -> usize {
        let mut delivered = 0;
        for id in ids {
            let Some(connection) = self.entries.get(id) else {
                tracing::debug!(window_id = %id, kind, "No connection registered, skipping");
                continue;
            };
            match connection.send(kind, data.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(window_id = %id, kind, error = %e, "Send failed");
                }
            }
        }
        delivered
    }

    /// Ids of the registered connections, sorted
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of tracked transports, including displaced ones
    pub fn len(&self) -> usize {
        self.entries.len() + self.shadowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every tracked transport
    pub fn close_all(&self) {
        for connection in self.entries.values().chain(self.shadowed.values()) {
            connection.close();
        }
    }
}
