// Watch-party relay: presence in the party room, playback control, chat and
// reactions. The server does not arbitrate playback; whatever command it
// relayed last is what viewers converge on.

use chrono::Utc;
use reelcircle_common::{
    protocol::ws::{PartyMessage, PartyReaction, PlaybackKind, PlaybackPayload, RoomId, ServerEvent},
    types::MovieId,
};
use uuid::Uuid;

use super::{ConnectionHandle, RealtimeHub};

impl RealtimeHub {
    /// Joins the party room and tells the viewers already there.
    pub async fn join_party(
        &self,
        group_id: Uuid,
        movie_id: MovieId,
        handle: ConnectionHandle,
        user_id: Uuid,
        username: String,
    ) -> usize {
        let room = RoomId::watch_party(group_id, movie_id);
        self.join_room(room, handle).await;
        self.broadcast(
            &room,
            ServerEvent::UserJoinedParty { group_id, movie_id, user_id, username },
            Some(handle),
        )
        .await
    }

    pub async fn leave_party(
        &self,
        group_id: Uuid,
        movie_id: MovieId,
        handle: ConnectionHandle,
        user_id: Uuid,
    ) -> usize {
        let room = RoomId::watch_party(group_id, movie_id);
        self.leave_room(&room, handle).await;
        self.broadcast(&room, ServerEvent::UserLeftParty { group_id, movie_id, user_id }, None)
            .await
    }

    /// Relays play, pause or seek verbatim to everyone but the issuer.
    pub async fn relay_playback(
        &self,
        kind: PlaybackKind,
        payload: PlaybackPayload,
        issuer: ConnectionHandle,
    ) -> usize {
        let room = payload.room();
        self.broadcast(&room, ServerEvent::playback(kind, payload), Some(issuer)).await
    }

    /// Chat reaches the whole room, sender included, stamped by the server.
    pub async fn relay_chat(
        &self,
        group_id: Uuid,
        movie_id: MovieId,
        sender_id: Uuid,
        sender_name: String,
        text: String,
    ) -> PartyMessage {
        let message = PartyMessage {
            group_id,
            movie_id,
            sender_id,
            sender_name,
            text,
            timestamp: Utc::now(),
        };
        let room = RoomId::watch_party(group_id, movie_id);
        self.broadcast(&room, ServerEvent::NewMessage(message.clone()), None).await;
        message
    }

    /// Reactions skip the sender, who already rendered their own locally.
    pub async fn relay_reaction(
        &self,
        group_id: Uuid,
        movie_id: MovieId,
        sender: ConnectionHandle,
        user_id: Uuid,
        username: String,
        emoji: String,
    ) -> PartyReaction {
        let timestamp = Utc::now();
        let reaction = PartyReaction {
            group_id,
            movie_id,
            user_id,
            username,
            emoji,
            timestamp,
            expires_at: timestamp.checked_add_signed(self.reaction_ttl()).unwrap_or(timestamp),
        };
        let room = RoomId::watch_party(group_id, movie_id);
        self.broadcast(&room, ServerEvent::NewReaction(reaction.clone()), Some(sender)).await;
        reaction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::test_support::drain;
    use chrono::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Viewer {
        user_id: Uuid,
        handle: ConnectionHandle,
        rx: UnboundedReceiver<ServerEvent>,
    }

    async fn party(hub: &RealtimeHub, group_id: Uuid, movie_id: MovieId, names: &[&str]) -> Vec<Viewer> {
        let mut viewers = Vec::new();
        for name in names {
            let user_id = Uuid::new_v4();
            let (handle, rx) = hub.connect(user_id, *name).await;
            hub.join_party(group_id, movie_id, handle, user_id, (*name).to_owned()).await;
            viewers.push(Viewer { user_id, handle, rx });
        }
        for viewer in &mut viewers {
            drain(&mut viewer.rx);
        }
        viewers
    }

    #[tokio::test]
    async fn join_is_announced_to_others_only() {
        let hub = RealtimeHub::new(3_000);
        let group_id = Uuid::new_v4();
        let mut viewers = party(&hub, group_id, 7, &["A"]).await;

        let newcomer = Uuid::new_v4();
        let (handle, mut rx_new) = hub.connect(newcomer, "B").await;
        let notified = hub.join_party(group_id, 7, handle, newcomer, "B".into()).await;

        assert_eq!(notified, 1);
        assert!(drain(&mut rx_new).is_empty());
        assert_eq!(
            drain(&mut viewers[0].rx),
            vec![ServerEvent::UserJoinedParty { group_id, movie_id: 7, user_id: newcomer, username: "B".into() }]
        );
    }

    #[tokio::test]
    async fn play_at_42_reaches_everyone_but_the_issuer() {
        let hub = RealtimeHub::new(3_000);
        let group_id = Uuid::new_v4();
        let mut viewers = party(&hub, group_id, 42, &["A", "B", "C"]).await;
        let payload =
            PlaybackPayload { group_id, movie_id: 42, user_id: viewers[0].user_id, timestamp: 42.0 };

        let sent = hub.relay_playback(PlaybackKind::Play, payload.clone(), viewers[0].handle).await;

        assert_eq!(sent, 2);
        assert!(drain(&mut viewers[0].rx).is_empty());
        for viewer in &mut viewers[1..] {
            assert_eq!(drain(&mut viewer.rx), vec![ServerEvent::VideoPlay(payload.clone())]);
        }
    }

    #[tokio::test]
    async fn last_relayed_command_wins() {
        let hub = RealtimeHub::new(3_000);
        let group_id = Uuid::new_v4();
        let mut viewers = party(&hub, group_id, 9, &["A", "B", "C"]).await;
        let pause = PlaybackPayload { group_id, movie_id: 9, user_id: viewers[0].user_id, timestamp: 10.0 };
        let seek = PlaybackPayload { group_id, movie_id: 9, user_id: viewers[1].user_id, timestamp: 95.5 };

        hub.relay_playback(PlaybackKind::Pause, pause, viewers[0].handle).await;
        hub.relay_playback(PlaybackKind::Seek, seek.clone(), viewers[1].handle).await;

        let last = drain(&mut viewers[2].rx).pop();
        assert_eq!(last, Some(ServerEvent::VideoSeek(seek)));
    }

    #[tokio::test]
    async fn playback_for_another_movie_stays_in_its_room() {
        let hub = RealtimeHub::new(3_000);
        let group_id = Uuid::new_v4();
        let mut viewers = party(&hub, group_id, 1, &["A", "B"]).await;
        let other_movie = PlaybackPayload { group_id, movie_id: 2, user_id: viewers[0].user_id, timestamp: 5.0 };

        assert_eq!(hub.relay_playback(PlaybackKind::Play, other_movie, viewers[0].handle).await, 0);
        assert!(drain(&mut viewers[1].rx).is_empty());
    }

    #[tokio::test]
    async fn chat_includes_sender_and_reactions_do_not() {
        let hub = RealtimeHub::new(1_500);
        let group_id = Uuid::new_v4();
        let mut viewers = party(&hub, group_id, 5, &["A", "B"]).await;

        let message =
            hub.relay_chat(group_id, 5, viewers[0].user_id, "A".into(), "popcorn time".into()).await;
        assert_eq!(drain(&mut viewers[0].rx), vec![ServerEvent::NewMessage(message.clone())]);
        assert_eq!(drain(&mut viewers[1].rx), vec![ServerEvent::NewMessage(message)]);

        let reaction = hub
            .relay_reaction(group_id, 5, viewers[0].handle, viewers[0].user_id, "A".into(), "😱".into())
            .await;
        assert_eq!(reaction.expires_at - reaction.timestamp, Duration::milliseconds(1_500));
        assert!(drain(&mut viewers[0].rx).is_empty());
        assert_eq!(drain(&mut viewers[1].rx), vec![ServerEvent::NewReaction(reaction)]);
    }

    #[tokio::test]
    async fn oversized_reaction_ttl_is_capped() {
        let hub = RealtimeHub::new(u64::MAX);
        let group_id = Uuid::new_v4();
        let mut viewers = party(&hub, group_id, 8, &["A", "B"]).await;

        let reaction = hub
            .relay_reaction(group_id, 8, viewers[0].handle, viewers[0].user_id, "A".into(), "🔥".into())
            .await;

        assert_eq!(
            reaction.expires_at - reaction.timestamp,
            Duration::milliseconds(crate::config::MAX_REACTION_TTL_MS as i64)
        );
        assert_eq!(drain(&mut viewers[1].rx), vec![ServerEvent::NewReaction(reaction)]);
    }

    #[tokio::test]
    async fn leave_tells_remaining_viewers() {
        let hub = RealtimeHub::new(3_000);
        let group_id = Uuid::new_v4();
        let mut viewers = party(&hub, group_id, 3, &["A", "B"]).await;
        let leaver = viewers[0].user_id;

        let notified = hub.leave_party(group_id, 3, viewers[0].handle, leaver).await;

        assert_eq!(notified, 1);
        assert!(drain(&mut viewers[0].rx).is_empty());
        assert_eq!(
            drain(&mut viewers[1].rx),
            vec![ServerEvent::UserLeftParty { group_id, movie_id: 3, user_id: leaver }]
        );
    }
}
