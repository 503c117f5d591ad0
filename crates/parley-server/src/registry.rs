//! Identity to live-connection bindings.
//!
//! At most one connection is bound per user. Binding replaces whatever was
//! there; unbinding only removes the entry if it still points at the caller's
//! own handle, so a connection that was superseded cannot evict its
//! replacement when it eventually goes away.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parley_core::UserId;
use tracing::{debug, info};

use crate::connection::ClientConnection;

/// A user's current connection.
#[derive(Clone, Debug)]
pub struct Binding {
    pub connection: Arc<ClientConnection>,
    pub bound_at: DateTime<Utc>,
}

/// Concurrent map of user id to bound connection.
#[derive(Default)]
pub struct ConnectionRegistry {
    bindings: DashMap<UserId, Binding>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user` to `connection`, returning the binding it replaced.
    pub fn bind(&self, user: UserId, connection: Arc<ClientConnection>) -> Option<Binding> {
        let conn_id = connection.id.clone();
        let previous = self.bindings.insert(
            user,
            Binding {
                connection,
                bound_at: Utc::now(),
            },
        );
        match &previous {
            Some(old) if old.connection.id != conn_id => {
                info!(
                    user_id = %user,
                    conn_id = %conn_id,
                    replaced = %old.connection.id,
                    held_since = %old.bound_at,
                    "binding superseded"
                );
            }
            _ => debug!(user_id = %user, conn_id = %conn_id, "bound"),
        }
        previous
    }

    /// Remove `user`'s binding if, and only if, it still refers to `connection`.
    ///
    /// The check and the removal happen under the same shard lock.
    pub fn unbind(&self, user: UserId, connection: &Arc<ClientConnection>) -> bool {
        let removed = self
            .bindings
            .remove_if(&user, |_, binding| Arc::ptr_eq(&binding.connection, connection))
            .is_some();
        if removed {
            debug!(user_id = %user, conn_id = %connection.id, "unbound");
        }
        removed
    }

    /// The connection currently bound to `user`.
    pub fn lookup(&self, user: UserId) -> Option<Arc<ClientConnection>> {
        self.bindings.get(&user).map(|b| b.connection.clone())
    }

    /// The current binding for `user`, including when it was made.
    pub fn binding(&self, user: UserId) -> Option<Binding> {
        self.bindings.get(&user).map(|b| b.clone())
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.bindings.contains_key(&user)
    }

    /// Bound users, sorted.
    pub fn online(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.bindings.iter().map(|e| *e.key()).collect();
        users.sort_unstable();
        users
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
