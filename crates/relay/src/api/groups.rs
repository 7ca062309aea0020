use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use reelcircle_common::{
    protocol::ws::{RoomId, ServerEvent},
    types::{Group, MovieId, NotificationKind, VotingSession},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{ApiError, ApiState};
use crate::{
    auth::middleware::AuthenticatedUser,
    store::NewGroup,
    validation::{
        self, ValidatedJson, MAX_GROUP_DESCRIPTION_CHARS, MAX_GROUP_NAME_CHARS,
    },
    voting,
};

const PUBLIC_GROUP_PAGE: usize = 20;

pub(super) fn routes() -> Router<ApiState> {
    Router::new()
        .route("/v1/groups", post(create_group).get(list_groups))
        .route("/v1/groups/{id}", get(get_group))
        .route("/v1/groups/{id}/join", post(join_group))
        .route("/v1/groups/{id}/leave", delete(leave_group))
        .route("/v1/groups/{id}/voting/start", post(start_voting))
        .route("/v1/groups/{id}/voting/vote", post(cast_vote))
}

#[derive(Debug, Deserialize)]
struct CreateGroupRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    max_members: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ListGroupsQuery {
    #[serde(default)]
    search: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartVotingRequest {
    movies: Vec<MovieId>,
    /// Minutes.
    duration: i64,
}

#[derive(Debug, Deserialize)]
struct CastVoteRequest {
    movie_id: MovieId,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GroupEnvelope {
    pub(crate) group: Group,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GroupsEnvelope {
    pub(crate) items: Vec<Group>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LeaveEnvelope {
    pub(crate) group_id: Uuid,
    pub(crate) left: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct VotingEnvelope {
    pub(crate) group_id: Uuid,
    pub(crate) voting: VotingSession,
    /// Candidates currently sharing the top count, in ballot order.
    pub(crate) leading: Vec<MovieId>,
}

impl VotingEnvelope {
    fn new(group_id: Uuid, voting: VotingSession) -> Self {
        let leading =
            voting::leading_candidates(&voting).iter().map(|candidate| candidate.movie_id).collect();
        Self { group_id, voting, leading }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct VoteEnvelope {
    pub(crate) group_id: Uuid,
    pub(crate) movie_id: MovieId,
    pub(crate) vote_count: u32,
    pub(crate) voting: VotingSession,
}

async fn create_group(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupEnvelope>), ApiError> {
    let new = NewGroup {
        name: validation::required_text("name", &payload.name, MAX_GROUP_NAME_CHARS)?,
        description: validation::optional_text(
            "description",
            payload.description.as_deref(),
            MAX_GROUP_DESCRIPTION_CHARS,
        )?,
        is_private: payload.is_private,
        max_members: validation::max_members(payload.max_members)?,
    };

    let group = state.store.create_group(user.user_id, new).await?;
    info!(group_id = %group.id, user_id = %user.user_id, "group created");

    Ok((StatusCode::CREATED, Json(GroupEnvelope { group })))
}

async fn list_groups(
    State(state): State<ApiState>,
    Query(query): Query<ListGroupsQuery>,
) -> Result<Json<GroupsEnvelope>, ApiError> {
    let search = query.search.as_deref().map(str::trim).filter(|term| !term.is_empty());
    let items = state.store.list_public_groups(search, PUBLIC_GROUP_PAGE).await?;
    Ok(Json(GroupsEnvelope { items }))
}

async fn get_group(
    State(state): State<ApiState>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<GroupEnvelope>, ApiError> {
    let group = state.store.get_group(group_id).await?;
    Ok(Json(GroupEnvelope { group }))
}

async fn join_group(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<GroupEnvelope>, ApiError> {
    let group = state.store.join_group(group_id, user.user_id).await?;
    info!(group_id = %group_id, user_id = %user.user_id, "member joined group");

    state
        .hub
        .broadcast(
            &RoomId::Group(group_id),
            ServerEvent::MemberJoined {
                group_id,
                user_id: Some(user.user_id),
                timestamp: Utc::now(),
            },
            None,
        )
        .await;

    let content = format!("A new member joined {}", group.name);
    for admin in group.admins().filter(|admin| admin.user_id != user.user_id) {
        notify_member(
            &state,
            admin.user_id,
            user.user_id,
            NotificationKind::GroupActivity,
            &content,
            group_id,
        )
        .await;
    }

    Ok(Json(GroupEnvelope { group }))
}

async fn leave_group(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
) -> Result<Json<LeaveEnvelope>, ApiError> {
    let left = state.store.leave_group(group_id, user.user_id).await?;
    state.hub.remove_user_from_room(user.user_id, &RoomId::Group(group_id)).await;
    if left {
        info!(group_id = %group_id, user_id = %user.user_id, "member left group");
    }

    Ok(Json(LeaveEnvelope { group_id, left }))
}

async fn start_voting(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<StartVotingRequest>,
) -> Result<Json<VotingEnvelope>, ApiError> {
    let started = state
        .store
        .start_voting(group_id, user.user_id, &payload.movies, payload.duration, Utc::now())
        .await?;

    if started.replaced_active {
        warn!(group_id = %group_id, user_id = %user.user_id, "active voting session replaced");
    }
    info!(
        group_id = %group_id,
        candidates = started.session.candidates.len(),
        ends_at = %started.session.ends_at,
        "voting started"
    );

    let event = ServerEvent::VotingStarted {
        group_id,
        candidates: started.session.candidate_ids(),
        ends_at: started.session.ends_at,
    };
    for member in &started.group.members {
        state.hub.send_to_user(member.user_id, event.clone()).await;
    }

    let content = format!("Voting started in {}", started.group.name);
    for member in started.group.members.iter().filter(|member| member.user_id != user.user_id) {
        notify_member(
            &state,
            member.user_id,
            user.user_id,
            NotificationKind::VotingStarted,
            &content,
            group_id,
        )
        .await;
    }

    Ok(Json(VotingEnvelope::new(group_id, started.session)))
}

async fn cast_vote(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<CastVoteRequest>,
) -> Result<Json<VoteEnvelope>, ApiError> {
    let outcome = state
        .store
        .cast_vote(group_id, payload.movie_id, user.user_id, state.voting_policy, Utc::now())
        .await?;

    state
        .hub
        .broadcast(
            &RoomId::Group(group_id),
            ServerEvent::VoteUpdated {
                group_id,
                movie_id: outcome.movie_id,
                vote_count: outcome.vote_count,
            },
            None,
        )
        .await;

    Ok(Json(VoteEnvelope {
        group_id,
        movie_id: outcome.movie_id,
        vote_count: outcome.vote_count,
        voting: outcome.session,
    }))
}

/// Side-effect notifications never fail the request that triggered them;
/// the state change has already been committed.
async fn notify_member(
    state: &ApiState,
    recipient_id: Uuid,
    sender_id: Uuid,
    kind: NotificationKind,
    content: &str,
    group_id: Uuid,
) {
    if let Err(error) = state
        .notifier
        .notify(recipient_id, Some(sender_id), kind, content, Some(format!("/groups/{group_id}")))
        .await
    {
        warn!(
            error = %error,
            recipient_id = %recipient_id,
            kind = kind.as_str(),
            "failed to store notification"
        );
    }
}
