// Notification fan-in: persist first, then push to the recipient's live
// connection if they have one.

use std::sync::Arc;

use reelcircle_common::{
    protocol::ws::ServerEvent,
    types::{Notification, NotificationKind},
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    metrics,
    realtime::RealtimeHub,
    store::{NewNotification, Store, StoreError},
};

#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    store: Store,
    hub: Arc<RealtimeHub>,
}

impl NotificationDispatcher {
    pub fn new(store: Store, hub: Arc<RealtimeHub>) -> Self {
        Self { store, hub }
    }

    /// Stores the notification and delivers it live when the recipient is
    /// online. Offline recipients pick it up from the listing endpoint.
    pub async fn notify(
        &self,
        recipient_id: Uuid,
        sender_id: Option<Uuid>,
        kind: NotificationKind,
        content: impl Into<String>,
        link: Option<String>,
    ) -> Result<Notification, StoreError> {
        let notification = self
            .store
            .create_notification(NewNotification {
                recipient_id,
                sender_id,
                kind,
                content: content.into(),
                link,
            })
            .await?;

        let delivered = self
            .hub
            .send_to_user(
                recipient_id,
                ServerEvent::NewNotification { notification: notification.clone() },
            )
            .await;
        metrics::record_notification(delivered);
        debug!(
            notification_id = %notification.id,
            recipient_id = %recipient_id,
            kind = kind.as_str(),
            delivered,
            "notification dispatched"
        );

        Ok(notification)
    }
}
