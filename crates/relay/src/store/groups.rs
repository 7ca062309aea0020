// Group, membership and voting persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reelcircle_common::types::{
    Group, GroupMember, GroupRole, MovieId, VotingCandidate, VotingSession,
};
use sqlx::{PgConnection, PgPool};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{MemoryStore, Store, StoreError};
use crate::voting::{self, VoteOutcome, VotingError, VotingPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroup {
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub max_members: u32,
}

/// A group right after a voting start, with the session it now holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedVoting {
    pub group: Group,
    pub session: VotingSession,
    pub replaced_active: bool,
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    created_by: Uuid,
    is_private: bool,
    max_members: i32,
    created_at: DateTime<Utc>,
}

impl GroupRow {
    fn into_group(
        self,
        members: Vec<GroupMember>,
        current_voting: Option<VotingSession>,
    ) -> Result<Group, StoreError> {
        let max_members = u32::try_from(self.max_members)
            .map_err(|_| StoreError::Corrupt(format!("max_members {}", self.max_members)))?;
        Ok(Group {
            id: self.id,
            name: self.name,
            description: self.description,
            created_by: self.created_by,
            is_private: self.is_private,
            max_members,
            members,
            current_voting,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    user_id: Uuid,
    role: String,
    joined_at: DateTime<Utc>,
}

impl TryFrom<MemberRow> for GroupMember {
    type Error = StoreError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        let role = GroupRole::from_db_value(&row.role)
            .ok_or_else(|| StoreError::Corrupt(format!("group role `{}`", row.role)))?;
        Ok(Self { user_id: row.user_id, role, joined_at: row.joined_at })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    is_active: bool,
    started_by: Uuid,
    started_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct VoteRow {
    movie_id: i64,
    voter_id: Uuid,
}

impl Store {
    /// Creates a group with `creator_id` as its only member and admin.
    pub async fn create_group(&self, creator_id: Uuid, new: NewGroup) -> Result<Group, StoreError> {
        match self {
            Self::Postgres(pool) => create_group_pg(pool, creator_id, new).await,
            Self::Memory(store) => create_group_memory(store, creator_id, new).await,
        }
    }

    /// Public groups, newest first, optionally filtered by a case-insensitive
    /// substring of the name.
    pub async fn list_public_groups(
        &self,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Group>, StoreError> {
        match self {
            Self::Postgres(pool) => list_public_groups_pg(pool, search, limit).await,
            Self::Memory(store) => list_public_groups_memory(store, search, limit).await,
        }
    }

    pub async fn get_group(&self, group_id: Uuid) -> Result<Group, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let mut conn = pool.acquire().await?;
                load_group(&mut conn, group_id).await?.ok_or(StoreError::GroupNotFound)
            }
            Self::Memory(store) => {
                store.read().await.groups.get(&group_id).cloned().ok_or(StoreError::GroupNotFound)
            }
        }
    }

    pub async fn join_group(&self, group_id: Uuid, user_id: Uuid) -> Result<Group, StoreError> {
        match self {
            Self::Postgres(pool) => join_group_pg(pool, group_id, user_id).await,
            Self::Memory(store) => join_group_memory(store, group_id, user_id).await,
        }
    }

    /// Idempotent: returns whether the user was a member.
    pub async fn leave_group(&self, group_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        match self {
            Self::Postgres(pool) => leave_group_pg(pool, group_id, user_id).await,
            Self::Memory(store) => leave_group_memory(store, group_id, user_id).await,
        }
    }

    pub async fn start_voting(
        &self,
        group_id: Uuid,
        requester_id: Uuid,
        candidates: &[MovieId],
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<StartedVoting, StoreError> {
        match self {
            Self::Postgres(pool) => {
                start_voting_pg(pool, group_id, requester_id, candidates, duration_minutes, now)
                    .await
            }
            Self::Memory(store) => {
                start_voting_memory(store, group_id, requester_id, candidates, duration_minutes, now)
                    .await
            }
        }
    }

    pub async fn cast_vote(
        &self,
        group_id: Uuid,
        movie_id: MovieId,
        voter_id: Uuid,
        policy: VotingPolicy,
        now: DateTime<Utc>,
    ) -> Result<VoteOutcome, StoreError> {
        match self {
            Self::Postgres(pool) => {
                cast_vote_pg(pool, group_id, movie_id, voter_id, policy, now).await
            }
            Self::Memory(store) => {
                let mut state = store.write().await;
                let group = state.groups.get_mut(&group_id).ok_or(StoreError::GroupNotFound)?;
                Ok(voting::apply_vote(group, movie_id, voter_id, policy, now)?)
            }
        }
    }
}

/// Loads a group with its members, session, ballot and votes.
async fn load_group(conn: &mut PgConnection, group_id: Uuid) -> Result<Option<Group>, StoreError> {
    let Some(row) = sqlx::query_as::<_, GroupRow>(
        r#"
        SELECT id, name, description, created_by, is_private, max_members, created_at
        FROM groups
        WHERE id = $1
        "#,
    )
    .bind(group_id)
    .fetch_optional(&mut *conn)
    .await?
    else {
        return Ok(None);
    };

    let members = sqlx::query_as::<_, MemberRow>(
        r#"
        SELECT user_id, role, joined_at
        FROM group_members
        WHERE group_id = $1
        ORDER BY joined_at ASC, user_id ASC
        "#,
    )
    .bind(group_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(GroupMember::try_from)
    .collect::<Result<Vec<_>, _>>()?;

    let current_voting = load_session(conn, group_id).await?;

    row.into_group(members, current_voting).map(Some)
}

async fn load_session(
    conn: &mut PgConnection,
    group_id: Uuid,
) -> Result<Option<VotingSession>, StoreError> {
    let Some(session) = sqlx::query_as::<_, SessionRow>(
        r#"
        SELECT id, is_active, started_by, started_at, ends_at
        FROM voting_sessions
        WHERE group_id = $1
        "#,
    )
    .bind(group_id)
    .fetch_optional(&mut *conn)
    .await?
    else {
        return Ok(None);
    };

    let movie_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT movie_id FROM voting_candidates WHERE session_id = $1 ORDER BY ballot_order ASC",
    )
    .bind(session.id)
    .fetch_all(&mut *conn)
    .await?;

    let votes = sqlx::query_as::<_, VoteRow>(
        r#"
        SELECT movie_id, voter_id
        FROM voting_votes
        WHERE session_id = $1
        ORDER BY cast_at ASC, voter_id ASC
        "#,
    )
    .bind(session.id)
    .fetch_all(&mut *conn)
    .await?;

    let mut candidates: Vec<VotingCandidate> =
        movie_ids.into_iter().map(VotingCandidate::new).collect();
    for vote in votes {
        if let Some(candidate) =
            candidates.iter_mut().find(|candidate| candidate.movie_id == vote.movie_id)
        {
            candidate.voters.push(vote.voter_id);
        }
    }
    for candidate in &mut candidates {
        candidate.vote_count = u32::try_from(candidate.voters.len()).unwrap_or(u32::MAX);
    }

    Ok(Some(VotingSession {
        is_active: session.is_active,
        candidates,
        ends_at: session.ends_at,
        started_by: session.started_by,
        started_at: session.started_at,
    }))
}

async fn create_group_pg(
    pool: &PgPool,
    creator_id: Uuid,
    new: NewGroup,
) -> Result<Group, StoreError> {
    let max_members = i32::try_from(new.max_members)
        .map_err(|_| StoreError::Corrupt(format!("max_members {}", new.max_members)))?;
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, GroupRow>(
        r#"
        INSERT INTO groups (id, name, description, created_by, is_private, max_members)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, name, description, created_by, is_private, max_members, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&new.name)
    .bind(new.description.as_deref())
    .bind(creator_id)
    .bind(new.is_private)
    .bind(max_members)
    .fetch_one(&mut *tx)
    .await?;

    let admin = sqlx::query_as::<_, MemberRow>(
        r#"
        INSERT INTO group_members (group_id, user_id, role)
        VALUES ($1, $2, 'admin')
        RETURNING user_id, role, joined_at
        "#,
    )
    .bind(row.id)
    .bind(creator_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    row.into_group(vec![GroupMember::try_from(admin)?], None)
}

async fn list_public_groups_pg(
    pool: &PgPool,
    search: Option<&str>,
    limit: usize,
) -> Result<Vec<Group>, StoreError> {
    let pattern = search.map(|term| format!("%{}%", escape_like(term)));
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id
        FROM groups
        WHERE NOT is_private
          AND ($1::text IS NULL OR name ILIKE $1)
        ORDER BY created_at DESC, id DESC
        LIMIT $2
        "#,
    )
    .bind(pattern)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut conn = pool.acquire().await?;
    let mut groups = Vec::with_capacity(ids.len());
    for id in ids {
        // A group deleted between the two queries is skipped.
        if let Some(group) = load_group(&mut conn, id).await? {
            groups.push(group);
        }
    }
    Ok(groups)
}

async fn join_group_pg(pool: &PgPool, group_id: Uuid, user_id: Uuid) -> Result<Group, StoreError> {
    let mut tx = pool.begin().await?;

    let max_members: i32 =
        sqlx::query_scalar("SELECT max_members FROM groups WHERE id = $1 FOR UPDATE")
            .bind(group_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::GroupNotFound)?;

    let already_member: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM group_members WHERE group_id = $1 AND user_id = $2)",
    )
    .bind(group_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    if already_member {
        return Err(StoreError::AlreadyMember);
    }

    let member_count: i64 =
        sqlx::query_scalar("SELECT count(*) FROM group_members WHERE group_id = $1")
            .bind(group_id)
            .fetch_one(&mut *tx)
            .await?;
    if member_count >= i64::from(max_members) {
        return Err(StoreError::GroupFull);
    }

    sqlx::query("INSERT INTO group_members (group_id, user_id, role) VALUES ($1, $2, 'member')")
        .bind(group_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    let group = load_group(&mut tx, group_id).await?.ok_or(StoreError::GroupNotFound)?;
    tx.commit().await?;

    Ok(group)
}

async fn leave_group_pg(pool: &PgPool, group_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM groups WHERE id = $1)")
        .bind(group_id)
        .fetch_one(pool)
        .await?;
    if !exists {
        return Err(StoreError::GroupNotFound);
    }

    let result = sqlx::query("DELETE FROM group_members WHERE group_id = $1 AND user_id = $2")
        .bind(group_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

async fn start_voting_pg(
    pool: &PgPool,
    group_id: Uuid,
    requester_id: Uuid,
    candidates: &[MovieId],
    duration_minutes: i64,
    now: DateTime<Utc>,
) -> Result<StartedVoting, StoreError> {
    let mut tx = pool.begin().await?;

    sqlx::query_scalar::<_, Uuid>("SELECT id FROM groups WHERE id = $1 FOR UPDATE")
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::GroupNotFound)?;

    let mut group = load_group(&mut tx, group_id).await?.ok_or(StoreError::GroupNotFound)?;
    let outcome =
        voting::start_session(&mut group, requester_id, candidates, duration_minutes, now)?;

    // Cascades to the previous ballot and its votes.
    sqlx::query("DELETE FROM voting_sessions WHERE group_id = $1")
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

    let session_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO voting_sessions (id, group_id, is_active, started_by, started_at, ends_at)
        VALUES ($1, $2, TRUE, $3, $4, $5)
        "#,
    )
    .bind(session_id)
    .bind(group_id)
    .bind(outcome.session.started_by)
    .bind(outcome.session.started_at)
    .bind(outcome.session.ends_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO voting_candidates (session_id, movie_id, ballot_order)
        SELECT $1, ballot.movie_id, ballot.ord::int
        FROM UNNEST($2::bigint[]) WITH ORDINALITY AS ballot(movie_id, ord)
        "#,
    )
    .bind(session_id)
    .bind(candidates)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(StartedVoting { group, session: outcome.session, replaced_active: outcome.replaced_active })
}

/// Inserts the vote only when every precondition holds in one statement.
/// A rejected insert is classified against the freshly loaded group.
///
/// The session row is share-locked for the whole transaction, so a concurrent
/// `start_voting` cannot swap the ballot between the insert and the snapshot.
async fn cast_vote_pg(
    pool: &PgPool,
    group_id: Uuid,
    movie_id: MovieId,
    voter_id: Uuid,
    policy: VotingPolicy,
    now: DateTime<Utc>,
) -> Result<VoteOutcome, StoreError> {
    let mut tx = pool.begin().await?;

    let locked_session: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM voting_sessions WHERE group_id = $1 FOR SHARE")
            .bind(group_id)
            .fetch_optional(&mut *tx)
            .await?;

    let inserted: Option<Uuid> = sqlx::query_scalar(
        r#"
        INSERT INTO voting_votes (session_id, movie_id, voter_id, cast_at)
        SELECT s.id, c.movie_id, $3, $4
        FROM voting_sessions AS s
        INNER JOIN voting_candidates AS c
            ON c.session_id = s.id AND c.movie_id = $2
        INNER JOIN group_members AS m
            ON m.group_id = s.group_id AND m.user_id = $3
        WHERE s.group_id = $1
          AND s.is_active
          AND ($5 = FALSE OR $4 < s.ends_at)
        ON CONFLICT DO NOTHING
        RETURNING session_id
        "#,
    )
    .bind(group_id)
    .bind(movie_id)
    .bind(voter_id)
    .bind(now)
    .bind(policy.enforce_expiry)
    .fetch_optional(&mut *tx)
    .await?;

    let group = load_group(&mut tx, group_id).await?.ok_or(StoreError::GroupNotFound)?;

    let Some(session_id) = inserted else {
        voting::check_vote(&group, movie_id, voter_id, policy, now)?;
        // Preconditions passed on reload, so the session changed under us.
        return Err(VotingError::Inactive.into());
    };
    ensure_same_session(session_id, locked_session)?;

    let session = group.current_voting.ok_or(VotingError::Inactive)?;
    let vote_count = session.candidate(movie_id).map_or(0, |candidate| candidate.vote_count);
    tx.commit().await?;

    Ok(VoteOutcome { session, movie_id, vote_count })
}

/// A vote that landed in a session other than the one this transaction
/// snapshots is rolled back rather than reported against the wrong ballot.
fn ensure_same_session(voted_in: Uuid, snapshot: Option<Uuid>) -> Result<(), VotingError> {
    if snapshot == Some(voted_in) {
        Ok(())
    } else {
        Err(VotingError::Inactive)
    }
}

async fn create_group_memory(
    store: &Arc<RwLock<MemoryStore>>,
    creator_id: Uuid,
    new: NewGroup,
) -> Result<Group, StoreError> {
    let now = Utc::now();
    let group = Group {
        id: Uuid::new_v4(),
        name: new.name,
        description: new.description,
        created_by: creator_id,
        is_private: new.is_private,
        max_members: new.max_members,
        members: vec![GroupMember { user_id: creator_id, role: GroupRole::Admin, joined_at: now }],
        current_voting: None,
        created_at: now,
    };

    store.write().await.groups.insert(group.id, group.clone());
    Ok(group)
}

async fn list_public_groups_memory(
    store: &Arc<RwLock<MemoryStore>>,
    search: Option<&str>,
    limit: usize,
) -> Result<Vec<Group>, StoreError> {
    let needle = search.map(str::to_lowercase);
    let state = store.read().await;

    let mut groups: Vec<Group> = state
        .groups
        .values()
        .filter(|group| !group.is_private)
        .filter(|group| {
            needle.as_deref().is_none_or(|needle| group.name.to_lowercase().contains(needle))
        })
        .cloned()
        .collect();
    groups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    groups.truncate(limit);

    Ok(groups)
}

async fn join_group_memory(
    store: &Arc<RwLock<MemoryStore>>,
    group_id: Uuid,
    user_id: Uuid,
) -> Result<Group, StoreError> {
    let mut state = store.write().await;
    let group = state.groups.get_mut(&group_id).ok_or(StoreError::GroupNotFound)?;

    if group.is_member(user_id) {
        return Err(StoreError::AlreadyMember);
    }
    if group.is_full() {
        return Err(StoreError::GroupFull);
    }

    group.members.push(GroupMember { user_id, role: GroupRole::Member, joined_at: Utc::now() });
    Ok(group.clone())
}

async fn leave_group_memory(
    store: &Arc<RwLock<MemoryStore>>,
    group_id: Uuid,
    user_id: Uuid,
) -> Result<bool, StoreError> {
    let mut state = store.write().await;
    let group = state.groups.get_mut(&group_id).ok_or(StoreError::GroupNotFound)?;

    let before = group.members.len();
    group.members.retain(|member| member.user_id != user_id);
    Ok(group.members.len() != before)
}

async fn start_voting_memory(
    store: &Arc<RwLock<MemoryStore>>,
    group_id: Uuid,
    requester_id: Uuid,
    candidates: &[MovieId],
    duration_minutes: i64,
    now: DateTime<Utc>,
) -> Result<StartedVoting, StoreError> {
    let mut state = store.write().await;
    let group = state.groups.get_mut(&group_id).ok_or(StoreError::GroupNotFound)?;

    let outcome = voting::start_session(group, requester_id, candidates, duration_minutes, now)?;
    Ok(StartedVoting {
        group: group.clone(),
        session: outcome.session,
        replaced_active: outcome.replaced_active,
    })
}

/// Escapes LIKE metacharacters so user search text matches literally.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
