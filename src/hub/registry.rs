//! Connection registry: which live connections belong to which user
//!
//! A user can hold several connections at once (tabs, devices). Entries are
//! created on the first connection and dropped as soon as the last one goes
//! away, so repeated connect/disconnect cycles do not grow the map.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::types::{ConnectionId, UserId};

/// Thread-safe `UserId -> {ConnectionId}` map
#[derive(Default)]
pub struct ConnectionRegistry {
    users: RwLock<HashMap<UserId, HashSet<ConnectionId>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the user's set. Registering the same pair twice is a no-op.
    pub fn register(&self, user: UserId, connection: ConnectionId) {
        self.users
            .write()
            .entry(user)
            .or_default()
            .insert(connection);
    }

    /// Remove a connection; drops the user entry once no connections remain.
    ///
    /// Unknown pairs are ignored: disconnect callbacks may race with each other.
    pub fn unregister(&self, user: UserId, connection: &ConnectionId) {
        let mut users = self.users.write();
        if let Some(connections) = users.get_mut(&user) {
            connections.remove(connection);
            if connections.is_empty() {
                users.remove(&user);
            }
        }
    }

    /// Live connections for `user`; empty when the user is offline.
    pub fn connections_for(&self, user: UserId) -> HashSet<ConnectionId> {
        self.users.read().get(&user).cloned().unwrap_or_default()
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.users.read().contains_key(&user)
    }

    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }
}
