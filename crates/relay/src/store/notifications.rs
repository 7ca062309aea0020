// Notification persistence. Every notification is stored before any live
// delivery is attempted, so an offline recipient still finds it later.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reelcircle_common::types::{Notification, NotificationKind};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{MemoryStore, Store, StoreError};

pub const DEFAULT_NOTIFICATION_PAGE: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub recipient_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub kind: NotificationKind,
    pub content: String,
    pub link: Option<String>,
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    recipient_id: Uuid,
    sender_id: Option<Uuid>,
    kind: String,
    content: String,
    link: Option<String>,
    read: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let kind = NotificationKind::from_db_value(&row.kind)
            .ok_or_else(|| StoreError::Corrupt(format!("notification kind `{}`", row.kind)))?;
        Ok(Self {
            id: row.id,
            recipient_id: row.recipient_id,
            sender_id: row.sender_id,
            kind,
            content: row.content,
            link: row.link,
            read: row.read,
            created_at: row.created_at,
        })
    }
}

impl Store {
    pub async fn create_notification(
        &self,
        new: NewNotification,
    ) -> Result<Notification, StoreError> {
        match self {
            Self::Postgres(pool) => create_notification_pg(pool, new).await,
            Self::Memory(store) => create_notification_memory(store, new).await,
        }
    }

    /// Newest first.
    pub async fn list_notifications(
        &self,
        recipient_id: Uuid,
        unread_only: bool,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        match self {
            Self::Postgres(pool) => {
                list_notifications_pg(pool, recipient_id, unread_only, limit).await
            }
            Self::Memory(store) => {
                list_notifications_memory(store, recipient_id, unread_only, limit).await
            }
        }
    }

    pub async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Notification, StoreError> {
        match self {
            Self::Postgres(pool) => mark_read_pg(pool, notification_id, recipient_id).await,
            Self::Memory(store) => mark_read_memory(store, notification_id, recipient_id).await,
        }
    }

    /// Returns how many notifications flipped from unread to read.
    pub async fn mark_all_notifications_read(&self, recipient_id: Uuid) -> Result<u64, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query(
                    "UPDATE notifications SET read = TRUE WHERE recipient_id = $1 AND NOT read",
                )
                .bind(recipient_id)
                .execute(pool)
                .await?;
                Ok(result.rows_affected())
            }
            Self::Memory(store) => {
                let mut state = store.write().await;
                let mut updated = 0;
                for notification in state.notifications.values_mut() {
                    if notification.recipient_id == recipient_id && !notification.read {
                        notification.read = true;
                        updated += 1;
                    }
                }
                Ok(updated)
            }
        }
    }

    pub async fn delete_notification(
        &self,
        notification_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => delete_notification_pg(pool, notification_id, recipient_id).await,
            Self::Memory(store) => {
                let mut state = store.write().await;
                let notification = state
                    .notifications
                    .get(&notification_id)
                    .ok_or(StoreError::NotificationNotFound)?;
                if notification.recipient_id != recipient_id {
                    return Err(StoreError::NotRecipient);
                }
                state.notifications.remove(&notification_id);
                Ok(())
            }
        }
    }
}

const NOTIFICATION_COLUMNS: &str =
    "id, recipient_id, sender_id, kind, content, link, read, created_at";

async fn create_notification_pg(
    pool: &PgPool,
    new: NewNotification,
) -> Result<Notification, StoreError> {
    let row = sqlx::query_as::<_, NotificationRow>(&format!(
        r#"
        INSERT INTO notifications (id, recipient_id, sender_id, kind, content, link)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {NOTIFICATION_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(new.recipient_id)
    .bind(new.sender_id)
    .bind(new.kind.as_str())
    .bind(&new.content)
    .bind(new.link.as_deref())
    .fetch_one(pool)
    .await?;

    Notification::try_from(row)
}

async fn list_notifications_pg(
    pool: &PgPool,
    recipient_id: Uuid,
    unread_only: bool,
    limit: usize,
) -> Result<Vec<Notification>, StoreError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    sqlx::query_as::<_, NotificationRow>(&format!(
        r#"
        SELECT {NOTIFICATION_COLUMNS}
        FROM notifications
        WHERE recipient_id = $1
          AND ($2 = FALSE OR NOT read)
        ORDER BY created_at DESC, id DESC
        LIMIT $3
        "#
    ))
    .bind(recipient_id)
    .bind(unread_only)
    .bind(limit)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(Notification::try_from)
    .collect()
}

/// Tells a missing notification apart from one that belongs to someone else.
async fn ownership_error(pool: &PgPool, notification_id: Uuid) -> Result<StoreError, StoreError> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM notifications WHERE id = $1)")
            .bind(notification_id)
            .fetch_one(pool)
            .await?;
    Ok(if exists { StoreError::NotRecipient } else { StoreError::NotificationNotFound })
}

async fn mark_read_pg(
    pool: &PgPool,
    notification_id: Uuid,
    recipient_id: Uuid,
) -> Result<Notification, StoreError> {
    let row = sqlx::query_as::<_, NotificationRow>(&format!(
        r#"
        UPDATE notifications
        SET read = TRUE
        WHERE id = $1 AND recipient_id = $2
        RETURNING {NOTIFICATION_COLUMNS}
        "#
    ))
    .bind(notification_id)
    .bind(recipient_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Notification::try_from(row),
        None => Err(ownership_error(pool, notification_id).await?),
    }
}

async fn delete_notification_pg(
    pool: &PgPool,
    notification_id: Uuid,
    recipient_id: Uuid,
) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND recipient_id = $2")
        .bind(notification_id)
        .bind(recipient_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ownership_error(pool, notification_id).await?);
    }
    Ok(())
}

async fn create_notification_memory(
    store: &Arc<RwLock<MemoryStore>>,
    new: NewNotification,
) -> Result<Notification, StoreError> {
    let notification = Notification {
        id: Uuid::new_v4(),
        recipient_id: new.recipient_id,
        sender_id: new.sender_id,
        kind: new.kind,
        content: new.content,
        link: new.link,
        read: false,
        created_at: Utc::now(),
    };
    store.write().await.notifications.insert(notification.id, notification.clone());
    Ok(notification)
}

async fn list_notifications_memory(
    store: &Arc<RwLock<MemoryStore>>,
    recipient_id: Uuid,
    unread_only: bool,
    limit: usize,
) -> Result<Vec<Notification>, StoreError> {
    let state = store.read().await;
    let mut notifications: Vec<Notification> = state
        .notifications
        .values()
        .filter(|notification| notification.recipient_id == recipient_id)
        .filter(|notification| !unread_only || !notification.read)
        .cloned()
        .collect();
    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    notifications.truncate(limit);
    Ok(notifications)
}

async fn mark_read_memory(
    store: &Arc<RwLock<MemoryStore>>,
    notification_id: Uuid,
    recipient_id: Uuid,
) -> Result<Notification, StoreError> {
    let mut state = store.write().await;
    let notification =
        state.notifications.get_mut(&notification_id).ok_or(StoreError::NotificationNotFound)?;
    if notification.recipient_id != recipient_id {
        return Err(StoreError::NotRecipient);
    }
    notification.read = true;
    Ok(notification.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite(recipient_id: Uuid, content: &str) -> NewNotification {
        NewNotification {
            recipient_id,
            sender_id: Some(Uuid::new_v4()),
            kind: NotificationKind::GroupInvite,
            content: content.to_owned(),
            link: Some("/groups/1".to_owned()),
        }
    }

    #[tokio::test]
    async fn created_notifications_start_unread_and_list_newest_first() {
        let store = Store::memory();
        let recipient = Uuid::new_v4();
        let first = store.create_notification(invite(recipient, "first")).await.expect("first");
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = store.create_notification(invite(recipient, "second")).await.expect("second");
        store.create_notification(invite(Uuid::new_v4(), "someone else")).await.expect("other");

        assert!(!first.read);
        let listed = store
            .list_notifications(recipient, false, DEFAULT_NOTIFICATION_PAGE)
            .await
            .expect("list should succeed");
        let ids: Vec<Uuid> = listed.iter().map(|notification| notification.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn mark_read_checks_recipient() {
        let store = Store::memory();
        let recipient = Uuid::new_v4();
        let notification = store.create_notification(invite(recipient, "hi")).await.expect("create");

        assert!(matches!(
            store.mark_notification_read(notification.id, Uuid::new_v4()).await,
            Err(StoreError::NotRecipient)
        ));
        assert!(matches!(
            store.mark_notification_read(Uuid::new_v4(), recipient).await,
            Err(StoreError::NotificationNotFound)
        ));

        let read = store
            .mark_notification_read(notification.id, recipient)
            .await
            .expect("owner should mark read");
        assert!(read.read);
        assert!(store.list_notifications(recipient, true, 50).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn mark_all_read_counts_only_unread() {
        let store = Store::memory();
        let recipient = Uuid::new_v4();
        let one = store.create_notification(invite(recipient, "one")).await.expect("one");
        store.create_notification(invite(recipient, "two")).await.expect("two");
        store.mark_notification_read(one.id, recipient).await.expect("read one");

        assert_eq!(store.mark_all_notifications_read(recipient).await.expect("mark all"), 1);
        assert_eq!(store.mark_all_notifications_read(recipient).await.expect("again"), 0);
    }

    #[tokio::test]
    async fn delete_is_limited_to_recipient() {
        let store = Store::memory();
        let recipient = Uuid::new_v4();
        let notification = store.create_notification(invite(recipient, "bye")).await.expect("create");

        assert!(matches!(
            store.delete_notification(notification.id, Uuid::new_v4()).await,
            Err(StoreError::NotRecipient)
        ));
        store.delete_notification(notification.id, recipient).await.expect("owner deletes");
        assert!(matches!(
            store.delete_notification(notification.id, recipient).await,
            Err(StoreError::NotificationNotFound)
        ));
    }
}
