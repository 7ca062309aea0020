// Connection table: one entry per open socket, keyed by an integer handle.

use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use reelcircle_common::protocol::ws::ServerEvent;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Opaque id of one live socket. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionIdentity {
    pub user_id: Uuid,
    pub display_name: String,
}

#[derive(Debug)]
struct ConnectionEntry {
    identity: ConnectionIdentity,
    outbound: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Debug)]
pub struct ConnectionTable {
    next_handle: AtomicU64,
    entries: RwLock<HashMap<ConnectionHandle, ConnectionEntry>>,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self { next_handle: AtomicU64::new(1), entries: RwLock::new(HashMap::new()) }
    }
}

impl ConnectionTable {
    pub async fn register(
        &self,
        identity: ConnectionIdentity,
        outbound: mpsc::UnboundedSender<ServerEvent>,
    ) -> ConnectionHandle {
        let handle = ConnectionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.entries.write().await.insert(handle, ConnectionEntry { identity, outbound });
        handle
    }

    pub async fn remove(&self, handle: ConnectionHandle) -> Option<ConnectionIdentity> {
        self.entries.write().await.remove(&handle).map(|entry| entry.identity)
    }

    pub async fn identity(&self, handle: ConnectionHandle) -> Option<ConnectionIdentity> {
        self.entries.read().await.get(&handle).map(|entry| entry.identity.clone())
    }

    /// Queues one event on a handle's outbound channel. False when the handle
    /// is gone or its socket task has already stopped draining.
    pub async fn send(&self, handle: ConnectionHandle, event: ServerEvent) -> bool {
        let sender = self.entries.read().await.get(&handle).map(|entry| entry.outbound.clone());
        match sender {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Clones the outbound senders for `handles`, skipping unknown ones.
    pub async fn senders<I>(&self, handles: I) -> Vec<mpsc::UnboundedSender<ServerEvent>>
    where
        I: IntoIterator<Item = ConnectionHandle>,
    {
        let guard = self.entries.read().await;
        handles
            .into_iter()
            .filter_map(|handle| guard.get(&handle).map(|entry| entry.outbound.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
