// Presence: which connection currently speaks for a user.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::connections::ConnectionHandle;

/// Maps a user to the most recent connection that announced them online.
///
/// Last connection wins. A second tab silently takes over delivery from the first.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    by_user: RwLock<HashMap<Uuid, ConnectionHandle>>,
}

impl PresenceRegistry {
    /// Records `handle` for `user_id`, returning the handle it replaced.
    pub async fn set_online(
        &self,
        user_id: Uuid,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        self.by_user.write().await.insert(user_id, handle).filter(|previous| *previous != handle)
    }

    pub async fn handle_for(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.by_user.read().await.get(&user_id).copied()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.by_user.read().await.contains_key(&user_id)
    }

    /// Drops every user still mapped to `handle`.
    ///
    /// Users that have since moved to a newer handle are left alone.
    pub async fn clear(&self, handle: ConnectionHandle) -> Vec<Uuid> {
        let mut guard = self.by_user.write().await;
        let users: Vec<Uuid> = guard
            .iter()
            .filter(|(_, mapped)| **mapped == handle)
            .map(|(user_id, _)| *user_id)
            .collect();
        for user_id in &users {
            guard.remove(user_id);
        }
        users
    }

    pub async fn online_count(&self) -> usize {
        self.by_user.read().await.len()
    }
}
