// Process-scoped realtime hub: connections, presence and rooms.
//
// Every delivery goes through a connection's own unbounded channel, so the
// order in which one sender's events reach one receiver is the order they
// were emitted. Fan-out collects senders under the read locks, then sends
// after releasing them.

pub mod connections;
pub mod presence;
pub mod rooms;
pub mod watch_party;

use chrono::Duration;
use reelcircle_common::protocol::ws::{RoomId, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{config::MAX_REACTION_TTL_MS, metrics};

pub use connections::{ConnectionHandle, ConnectionIdentity};
use connections::ConnectionTable;
use presence::PresenceRegistry;
use rooms::RoomRegistry;

/// What a disconnect tore down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisconnectReport {
    pub users_offline: Vec<Uuid>,
    pub rooms_left: Vec<RoomId>,
}

#[derive(Debug)]
pub struct RealtimeHub {
    connections: ConnectionTable,
    presence: PresenceRegistry,
    rooms: RoomRegistry,
    reaction_ttl: Duration,
}

impl RealtimeHub {
    pub fn new(reaction_ttl_ms: u64) -> Self {
        Self {
            connections: ConnectionTable::default(),
            presence: PresenceRegistry::default(),
            rooms: RoomRegistry::default(),
            reaction_ttl: Duration::milliseconds(reaction_ttl_ms.min(MAX_REACTION_TTL_MS) as i64),
        }
    }

    pub fn reaction_ttl(&self) -> Duration {
        self.reaction_ttl
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Registers a new socket and hands back the receiving end of its outbound queue.
    pub async fn connect(
        &self,
        user_id: Uuid,
        display_name: impl Into<String>,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let identity = ConnectionIdentity { user_id, display_name: display_name.into() };
        let handle = self.connections.register(identity, tx).await;
        metrics::adjust_connected_handles(1);
        debug!(%handle, user_id = %user_id, "connection registered");
        (handle, rx)
    }

    /// Tears down every trace of `handle`.
    ///
    /// Watch-party rooms the handle was still in hear `user_left_party`, the
    /// same as an explicit leave. Calling it twice is harmless.
    pub async fn disconnect(&self, handle: ConnectionHandle) -> DisconnectReport {
        let rooms_left = self.rooms.leave_all(handle).await;
        let users_offline = self.presence.clear(handle).await;
        let identity = self.connections.remove(handle).await;

        if let Some(identity) = identity.as_ref() {
            metrics::adjust_connected_handles(-1);
            for room in &rooms_left {
                if let RoomId::WatchParty { group_id, movie_id } = *room {
                    let event =
                        ServerEvent::UserLeftParty { group_id, movie_id, user_id: identity.user_id };
                    self.broadcast(room, event, None).await;
                }
            }
        }

        for user_id in &users_offline {
            info!(user_id = %user_id, %handle, "user offline");
        }

        DisconnectReport { users_offline, rooms_left }
    }

    pub async fn identity(&self, handle: ConnectionHandle) -> Option<ConnectionIdentity> {
        self.connections.identity(handle).await
    }

    pub async fn set_online(&self, user_id: Uuid, handle: ConnectionHandle) {
        if let Some(previous) = self.presence.set_online(user_id, handle).await {
            debug!(user_id = %user_id, %previous, %handle, "presence moved to newer connection");
        }
        info!(user_id = %user_id, %handle, "user online");
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.presence.is_online(user_id).await
    }

    pub async fn send_to_handle(&self, handle: ConnectionHandle, event: ServerEvent) -> bool {
        self.connections.send(handle, event).await
    }

    /// Delivers to the user's present connection. Absent users are a silent no-op.
    pub async fn send_to_user(&self, user_id: Uuid, event: ServerEvent) -> bool {
        match self.presence.handle_for(user_id).await {
            Some(handle) => self.connections.send(handle, event).await,
            None => false,
        }
    }

    pub async fn join_room(&self, room: RoomId, handle: ConnectionHandle) -> bool {
        self.rooms.join(room, handle).await
    }

    pub async fn leave_room(&self, room: &RoomId, handle: ConnectionHandle) -> bool {
        self.rooms.leave(room, handle).await
    }

    /// Pulls the user's present connection out of `room`, if they have one.
    pub async fn remove_user_from_room(&self, user_id: Uuid, room: &RoomId) -> bool {
        match self.presence.handle_for(user_id).await {
            Some(handle) => self.rooms.leave(room, handle).await,
            None => false,
        }
    }

    /// Fans `event` out to every member of `room` except `exclude`.
    ///
    /// Returns how many outbound queues accepted it.
    pub async fn broadcast(
        &self,
        room: &RoomId,
        event: ServerEvent,
        exclude: Option<ConnectionHandle>,
    ) -> usize {
        let members = self.rooms.members(room, exclude).await;
        if members.is_empty() {
            return 0;
        }
        let senders = self.connections.senders(members).await;

        let mut sent_count = 0;
        for sender in senders {
            if sender.send(event.clone()).is_ok() {
                sent_count += 1;
            }
        }

        debug!(%room, event = event.event_name(), sent_count, "room broadcast");
        sent_count
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.len().await
    }
}
