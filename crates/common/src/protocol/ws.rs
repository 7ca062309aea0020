// WebSocket event frames for the reelcircle-realtime.v1 protocol.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{MovieId, Notification, NotificationKind};

pub const CURRENT_PROTOCOL_VERSION: &str = "reelcircle-realtime.v1";

/// A logical broadcast group that connection handles subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoomId {
    Group(Uuid),
    WatchParty { group_id: Uuid, movie_id: MovieId },
}

impl RoomId {
    pub fn watch_party(group_id: Uuid, movie_id: MovieId) -> Self {
        Self::WatchParty { group_id, movie_id }
    }

    pub fn is_watch_party(&self) -> bool {
        matches!(self, Self::WatchParty { .. })
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group(group_id) => write!(f, "group:{group_id}"),
            Self::WatchParty { group_id, movie_id } => write!(f, "watch:{group_id}:{movie_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid room id: {0}")]
pub struct InvalidRoomId(pub String);

impl FromStr for RoomId {
    type Err = InvalidRoomId;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidRoomId(value.to_owned());
        let mut parts = value.split(':');
        let room = match (parts.next(), parts.next(), parts.next()) {
            (Some("group"), Some(group_id), None) => {
                Self::Group(Uuid::parse_str(group_id).map_err(|_| invalid())?)
            }
            (Some("watch"), Some(group_id), Some(movie_id)) => Self::WatchParty {
                group_id: Uuid::parse_str(group_id).map_err(|_| invalid())?,
                movie_id: movie_id.parse().map_err(|_| invalid())?,
            },
            _ => return Err(invalid()),
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(room)
    }
}

/// Transport-control payload shared by play, pause and seek.
///
/// `timestamp` is the playback position in seconds on the issuing client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackPayload {
    pub group_id: Uuid,
    pub movie_id: MovieId,
    pub user_id: Uuid,
    pub timestamp: f64,
}

impl PlaybackPayload {
    pub fn room(&self) -> RoomId {
        RoomId::watch_party(self.group_id, self.movie_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackKind {
    Play,
    Pause,
    Seek,
}

/// Ephemeral watch-party chat line. Never persisted or replayed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartyMessage {
    pub group_id: Uuid,
    pub movie_id: MovieId,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Ephemeral emoji reaction. Receivers drop it once `expires_at` passes,
/// even when the frame itself arrives late.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartyReaction {
    pub group_id: Uuid,
    pub movie_id: MovieId,
    pub user_id: Uuid,
    pub username: String,
    pub emoji: String,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Client -> Server frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Register presence for the authenticated user.
    UserOnline { user_id: Uuid },
    JoinGroup { group_id: Uuid },
    LeaveGroup { group_id: Uuid },
    GroupActivity { group_id: Uuid, activity: serde_json::Value },
    /// Live notice only; the tally itself changes through the HTTP vote endpoint.
    VoteCast { group_id: Uuid, movie_id: MovieId, user_id: Uuid },
    JoinWatchParty { group_id: Uuid, movie_id: MovieId, user_id: Uuid, username: String },
    LeaveWatchParty { group_id: Uuid, movie_id: MovieId, user_id: Uuid },
    VideoPlay(PlaybackPayload),
    VideoPause(PlaybackPayload),
    VideoSeek(PlaybackPayload),
    SendPartyMessage { group_id: Uuid, movie_id: MovieId, message: String },
    SendReaction {
        group_id: Uuid,
        movie_id: MovieId,
        user_id: Uuid,
        username: String,
        emoji: String,
    },
    Typing { user_id: Uuid, group_id: Uuid },
    StopTyping { user_id: Uuid, group_id: Uuid },
    /// Direct message to a single user, delivered only while they are online.
    SendMessage { to: Uuid, message: String },
    SendNotification {
        recipient: Uuid,
        kind: NotificationKind,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link: Option<String>,
    },
}

impl ClientEvent {
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::UserOnline { .. } => "user_online",
            Self::JoinGroup { .. } => "join_group",
            Self::LeaveGroup { .. } => "leave_group",
            Self::GroupActivity { .. } => "group_activity",
            Self::VoteCast { .. } => "vote_cast",
            Self::JoinWatchParty { .. } => "join_watch_party",
            Self::LeaveWatchParty { .. } => "leave_watch_party",
            Self::VideoPlay(_) => "video_play",
            Self::VideoPause(_) => "video_pause",
            Self::VideoSeek(_) => "video_seek",
            Self::SendPartyMessage { .. } => "send_party_message",
            Self::SendReaction { .. } => "send_reaction",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
            Self::SendMessage { .. } => "send_message",
            Self::SendNotification { .. } => "send_notification",
        }
    }
}

/// Server -> Client frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    VotingStarted { group_id: Uuid, candidates: Vec<MovieId>, ends_at: DateTime<Utc> },
    VoteUpdated { group_id: Uuid, movie_id: MovieId, vote_count: u32 },
    VoteReceived { group_id: Uuid, movie_id: MovieId, user_id: Uuid, timestamp: DateTime<Utc> },
    NewNotification { notification: Notification },
    MemberJoined {
        group_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<Uuid>,
        timestamp: DateTime<Utc>,
    },
    ActivityUpdate { group_id: Uuid, activity: serde_json::Value },
    UserJoinedParty { group_id: Uuid, movie_id: MovieId, user_id: Uuid, username: String },
    UserLeftParty { group_id: Uuid, movie_id: MovieId, user_id: Uuid },
    VideoPlay(PlaybackPayload),
    VideoPause(PlaybackPayload),
    VideoSeek(PlaybackPayload),
    NewMessage(PartyMessage),
    NewReaction(PartyReaction),
    UserTyping { group_id: Uuid, user_id: Uuid },
    UserStopTyping { group_id: Uuid, user_id: Uuid },
    ReceiveMessage { from: Uuid, from_name: String, message: String, timestamp: DateTime<Utc> },
    Error { code: String, message: String, retryable: bool },
}

impl ServerEvent {
    pub fn playback(kind: PlaybackKind, payload: PlaybackPayload) -> Self {
        match kind {
            PlaybackKind::Play => Self::VideoPlay(payload),
            PlaybackKind::Pause => Self::VideoPause(payload),
            PlaybackKind::Seek => Self::VideoSeek(payload),
        }
    }

    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::VotingStarted { .. } => "voting_started",
            Self::VoteUpdated { .. } => "vote_updated",
            Self::VoteReceived { .. } => "vote_received",
            Self::NewNotification { .. } => "new_notification",
            Self::MemberJoined { .. } => "member_joined",
            Self::ActivityUpdate { .. } => "activity_update",
            Self::UserJoinedParty { .. } => "user_joined_party",
            Self::UserLeftParty { .. } => "user_left_party",
            Self::VideoPlay(_) => "video_play",
            Self::VideoPause(_) => "video_pause",
            Self::VideoSeek(_) => "video_seek",
            Self::NewMessage(_) => "new_message",
            Self::NewReaction(_) => "new_reaction",
            Self::UserTyping { .. } => "user_typing",
            Self::UserStopTyping { .. } => "user_stop_typing",
            Self::ReceiveMessage { .. } => "receive_message",
            Self::Error { .. } => "error",
        }
    }
}
