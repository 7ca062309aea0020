// Per-frame dispatch for the realtime socket.
//
// Every client event maps to one hub operation. Delivery is fire-and-forget:
// the emitter hears nothing back unless its frame was malformed or claimed an
// identity other than the authenticated one.

use chrono::Utc;
use reelcircle_common::protocol::ws::{ClientEvent, PlaybackKind, RoomId, ServerEvent};
use tracing::{debug, error};
use uuid::Uuid;

use super::protocol::{error_event, WS_IDENTITY_MISMATCH};
use crate::{
    api::ApiState,
    error::{ErrorCode, RelayError},
    metrics,
    realtime::{ConnectionHandle, ConnectionIdentity},
    validation::{self, MAX_CHAT_MESSAGE_CHARS, MAX_NOTIFICATION_CONTENT_CHARS},
};

const MAX_EMOJI_CHARS: usize = 16;

/// Applies one decoded client event on behalf of `handle`.
///
/// `Err` carries the error frame for the emitter.
pub async fn dispatch_client_event(
    state: &ApiState,
    handle: ConnectionHandle,
    identity: &ConnectionIdentity,
    event: ClientEvent,
) -> Result<(), ServerEvent> {
    let event_name = event.event_name();
    let result = apply_client_event(state, handle, identity, event).await;
    metrics::record_ws_event(event_name, result.is_err());
    if let Err(ServerEvent::Error { code, .. }) = &result {
        debug!(%handle, event = event_name, code = %code, "client event rejected");
    }
    result
}

async fn apply_client_event(
    state: &ApiState,
    handle: ConnectionHandle,
    identity: &ConnectionIdentity,
    event: ClientEvent,
) -> Result<(), ServerEvent> {
    let hub = &state.hub;

    match event {
        ClientEvent::UserOnline { user_id } => {
            ensure_self(identity, user_id)?;
            hub.set_online(user_id, handle).await;
        }
        ClientEvent::JoinGroup { group_id } => {
            let room = RoomId::Group(group_id);
            hub.join_room(room, handle).await;
            hub.broadcast(
                &room,
                ServerEvent::MemberJoined { group_id, user_id: None, timestamp: Utc::now() },
                None,
            )
            .await;
        }
        ClientEvent::LeaveGroup { group_id } => {
            hub.leave_room(&RoomId::Group(group_id), handle).await;
        }
        ClientEvent::GroupActivity { group_id, activity } => {
            hub.broadcast(
                &RoomId::Group(group_id),
                ServerEvent::ActivityUpdate { group_id, activity },
                None,
            )
            .await;
        }
        ClientEvent::VoteCast { group_id, movie_id, user_id } => {
            ensure_self(identity, user_id)?;
            hub.broadcast(
                &RoomId::Group(group_id),
                ServerEvent::VoteReceived { group_id, movie_id, user_id, timestamp: Utc::now() },
                None,
            )
            .await;
        }
        // Display names come from the access token, never from the frame.
        ClientEvent::JoinWatchParty { group_id, movie_id, user_id, username: _ } => {
            ensure_self(identity, user_id)?;
            hub.join_party(group_id, movie_id, handle, user_id, identity.display_name.clone()).await;
        }
        ClientEvent::LeaveWatchParty { group_id, movie_id, user_id } => {
            ensure_self(identity, user_id)?;
            hub.leave_party(group_id, movie_id, handle, user_id).await;
        }
        ClientEvent::VideoPlay(payload) => {
            ensure_self(identity, payload.user_id)?;
            hub.relay_playback(PlaybackKind::Play, payload, handle).await;
        }
        ClientEvent::VideoPause(payload) => {
            ensure_self(identity, payload.user_id)?;
            hub.relay_playback(PlaybackKind::Pause, payload, handle).await;
        }
        ClientEvent::VideoSeek(payload) => {
            ensure_self(identity, payload.user_id)?;
            hub.relay_playback(PlaybackKind::Seek, payload, handle).await;
        }
        ClientEvent::SendPartyMessage { group_id, movie_id, message } => {
            let text = validation::required_text("message", &message, MAX_CHAT_MESSAGE_CHARS)
                .map_err(|error| relay_error_event(&error))?;
            hub.relay_chat(group_id, movie_id, identity.user_id, identity.display_name.clone(), text)
                .await;
        }
        ClientEvent::SendReaction { group_id, movie_id, user_id, username: _, emoji } => {
            ensure_self(identity, user_id)?;
            let emoji = validation::required_text("emoji", &emoji, MAX_EMOJI_CHARS)
                .map_err(|error| relay_error_event(&error))?;
            let username = identity.display_name.clone();
            hub.relay_reaction(group_id, movie_id, handle, user_id, username, emoji).await;
        }
        ClientEvent::Typing { user_id, group_id } => {
            ensure_self(identity, user_id)?;
            hub.broadcast(&RoomId::Group(group_id), ServerEvent::UserTyping { group_id, user_id }, None)
                .await;
        }
        ClientEvent::StopTyping { user_id, group_id } => {
            ensure_self(identity, user_id)?;
            hub.broadcast(
                &RoomId::Group(group_id),
                ServerEvent::UserStopTyping { group_id, user_id },
                None,
            )
            .await;
        }
        ClientEvent::SendMessage { to, message } => {
            let message = validation::required_text("message", &message, MAX_CHAT_MESSAGE_CHARS)
                .map_err(|error| relay_error_event(&error))?;
            let delivered = hub
                .send_to_user(
                    to,
                    ServerEvent::ReceiveMessage {
                        from: identity.user_id,
                        from_name: identity.display_name.clone(),
                        message,
                        timestamp: Utc::now(),
                    },
                )
                .await;
            if !delivered {
                debug!(from = %identity.user_id, to = %to, "direct message dropped, recipient offline");
            }
        }
        ClientEvent::SendNotification { recipient, kind, content, link } => {
            let content =
                validation::required_text("content", &content, MAX_NOTIFICATION_CONTENT_CHARS)
                    .map_err(|error| relay_error_event(&error))?;
            if let Err(store_error) = state
                .notifier
                .notify(recipient, Some(identity.user_id), kind, content, link)
                .await
            {
                error!(error = %store_error, recipient_id = %recipient, "failed to store notification");
                return Err(relay_error_event(&RelayError::from_code(ErrorCode::InternalError)));
            }
        }
    }

    Ok(())
}

fn ensure_self(identity: &ConnectionIdentity, claimed: Uuid) -> Result<(), ServerEvent> {
    if claimed == identity.user_id {
        Ok(())
    } else {
        Err(error_event(WS_IDENTITY_MISMATCH, "user_id does not match the authenticated user"))
    }
}

fn relay_error_event(error: &RelayError) -> ServerEvent {
    ServerEvent::Error {
        code: error.code().as_str().to_owned(),
        message: error.message().to_owned(),
        retryable: error.code().retryable(),
    }
}
