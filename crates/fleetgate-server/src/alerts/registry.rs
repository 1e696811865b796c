//! Registry of connected streaming clients and their channel subscriptions.
//!
//! Each connection gets a [`ClientId`] and a bounded outbound queue; the
//! WebSocket task drains the queue into the socket. A client whose queue is
//! closed or full is considered dead and is pruned.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::metrics;

/// Channel carrying alert broadcasts.
pub const ALERTS_CHANNEL: &str = "alerts";

/// Outbound messages a client may have queued before it counts as dead.
pub const CLIENT_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct ClientEntry {
    tx: mpsc::Sender<Arc<str>>,
    subscriptions: HashSet<String>,
}

impl ClientEntry {
    fn is_live(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<ClientId, ClientEntry>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a client with no subscriptions and returns its outbound queue.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        let id = ClientId::new();
        self.clients.insert(
            id,
            ClientEntry {
                tx,
                subscriptions: HashSet::new(),
            },
        );
        metrics::set_ws_clients(self.clients.len());
        (id, rx)
    }

    /// Removes a client. Removing an absent client is a no-op.
    pub fn remove(&self, id: ClientId) -> bool {
        let removed = self.clients.remove(&id).is_some();
        if removed {
            metrics::set_ws_clients(self.clients.len());
        }
        removed
    }

    pub fn subscribe(&self, id: ClientId, channel: &str) -> bool {
        match self.clients.get_mut(&id) {
            Some(mut entry) => {
                entry.subscriptions.insert(channel.to_string());
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, id: ClientId, channel: &str) -> bool {
        match self.clients.get_mut(&id) {
            Some(mut entry) => entry.subscriptions.remove(channel),
            None => false,
        }
    }

    /// Queues `message` for one client; a failed delivery removes it.
    pub fn send(&self, id: ClientId, message: Arc<str>) -> bool {
        let delivered = self
            .clients
            .get(&id)
            .is_some_and(|entry| entry.tx.try_send(message).is_ok());
        if !delivered {
            self.remove(id);
        }
        delivered
    }

    /// Delivers `message` to every live client subscribed to `channel`.
    ///
    /// Clients that are no longer live, or whose delivery fails, are removed.
    /// Live clients without the subscription are left alone. Returns the
    /// number of clients the message was queued for.
    pub fn broadcast(&self, channel: &str, message: &Arc<str>) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.clients.iter() {
            if !entry.is_live() {
                dead.push(*entry.key());
            } else if entry.subscriptions.contains(channel) {
                match entry.tx.try_send(Arc::clone(message)) {
                    Ok(()) => delivered += 1,
                    Err(_) => dead.push(*entry.key()),
                }
            }
        }

        // Shard locks are released once iteration ends.
        let pruned = dead.into_iter().filter(|id| self.remove(*id)).count();
        if pruned > 0 {
            tracing::debug!(channel, pruned, "Pruned dead streaming clients");
            metrics::record_ws_pruned(pruned);
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }
}
