// Room membership: room id -> set of connection handles.

use std::collections::{BTreeSet, HashMap};

use reelcircle_common::protocol::ws::RoomId;
use tokio::sync::RwLock;

use super::connections::ConnectionHandle;

#[derive(Debug, Default)]
pub struct RoomRegistry {
    members: RwLock<HashMap<RoomId, BTreeSet<ConnectionHandle>>>,
}

impl RoomRegistry {
    /// Idempotent. Returns true when the handle was not already in the room.
    pub async fn join(&self, room: RoomId, handle: ConnectionHandle) -> bool {
        self.members.write().await.entry(room).or_default().insert(handle)
    }

    /// Idempotent. Empty rooms are dropped.
    pub async fn leave(&self, room: &RoomId, handle: ConnectionHandle) -> bool {
        let mut guard = self.members.write().await;
        let Some(handles) = guard.get_mut(room) else {
            return false;
        };
        let removed = handles.remove(&handle);
        if handles.is_empty() {
            guard.remove(room);
        }
        removed
    }

    /// Removes `handle` from every room and returns the rooms it was in.
    pub async fn leave_all(&self, handle: ConnectionHandle) -> Vec<RoomId> {
        let mut guard = self.members.write().await;
        let mut left = Vec::new();
        guard.retain(|room, handles| {
            if handles.remove(&handle) {
                left.push(*room);
            }
            !handles.is_empty()
        });
        left.sort();
        left
    }

    /// Members of `room` in handle order, minus `exclude`.
    pub async fn members(
        &self,
        room: &RoomId,
        exclude: Option<ConnectionHandle>,
    ) -> Vec<ConnectionHandle> {
        self.members
            .read()
            .await
            .get(room)
            .map(|handles| {
                handles.iter().copied().filter(|handle| Some(*handle) != exclude).collect()
            })
            .unwrap_or_default()
    }

    pub async fn contains(&self, room: &RoomId, handle: ConnectionHandle) -> bool {
        self.members.read().await.get(room).is_some_and(|handles| handles.contains(&handle))
    }

    pub async fn room_count(&self) -> usize {
        self.members.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::connections::{ConnectionIdentity, ConnectionTable};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    async fn handles(count: usize) -> Vec<ConnectionHandle> {
        let table = ConnectionTable::default();
        let mut out = Vec::new();
        for _ in 0..count {
            let (tx, _rx) = mpsc::unbounded_channel();
            let identity = ConnectionIdentity { user_id: Uuid::new_v4(), display_name: String::new() };
            out.push(table.register(identity, tx).await);
        }
        out
    }

    #[tokio::test]
    async fn join_and_leave_are_idempotent() {
        let rooms = RoomRegistry::default();
        let room = RoomId::Group(Uuid::new_v4());
        let hs = handles(1).await;

        assert!(rooms.join(room, hs[0]).await);
        assert!(!rooms.join(room, hs[0]).await);
        assert_eq!(rooms.members(&room, None).await, vec![hs[0]]);

        assert!(rooms.leave(&room, hs[0]).await);
        assert!(!rooms.leave(&room, hs[0]).await);
        assert_eq!(rooms.room_count().await, 0);
    }

    #[tokio::test]
    async fn members_honours_exclusion() {
        let rooms = RoomRegistry::default();
        let room = RoomId::watch_party(Uuid::new_v4(), 42);
        let hs = handles(3).await;
        for handle in &hs {
            rooms.join(room, *handle).await;
        }

        assert_eq!(rooms.members(&room, Some(hs[1])).await, vec![hs[0], hs[2]]);
        assert!(rooms.members(&RoomId::Group(Uuid::new_v4()), None).await.is_empty());
    }

    #[tokio::test]
    async fn leave_all_reports_rooms_and_prunes_empty_ones() {
        let rooms = RoomRegistry::default();
        let group_id = Uuid::new_v4();
        let group_room = RoomId::Group(group_id);
        let party_room = RoomId::watch_party(group_id, 7);
        let hs = handles(2).await;
        rooms.join(group_room, hs[0]).await;
        rooms.join(group_room, hs[1]).await;
        rooms.join(party_room, hs[0]).await;

        let left = rooms.leave_all(hs[0]).await;

        assert_eq!(left.len(), 2);
        assert!(left.contains(&group_room) && left.contains(&party_room));
        assert!(!rooms.contains(&group_room, hs[0]).await);
        assert!(rooms.contains(&group_room, hs[1]).await);
        assert_eq!(rooms.room_count().await, 1);
    }
}
