// Core domain types shared across all ReelCircle crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// TMDB-style numeric movie identifier.
pub type MovieId = i64;

/// Role of a member inside a group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GroupRole {
    Admin,
    Member,
}

impl GroupRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMember {
    pub user_id: Uuid,
    pub role: GroupRole,
    pub joined_at: DateTime<Utc>,
}

/// A group of users that votes on and watches movies together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub is_private: bool,
    pub max_members: u32,
    pub members: Vec<GroupMember>,
    /// The live (or most recent) voting session. Replaced wholesale on every start.
    pub current_voting: Option<VotingSession>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn member(&self, user_id: Uuid) -> Option<&GroupMember> {
        self.members.iter().find(|member| member.user_id == user_id)
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.member(user_id).is_some()
    }

    pub fn is_admin(&self, user_id: Uuid) -> bool {
        self.member(user_id).is_some_and(|member| member.role == GroupRole::Admin)
    }

    pub fn admins(&self) -> impl Iterator<Item = &GroupMember> {
        self.members.iter().filter(|member| member.role == GroupRole::Admin)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_members as usize
    }
}

/// One movie on a voting ballot together with the users that voted for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VotingCandidate {
    pub movie_id: MovieId,
    /// Insertion-ordered, duplicate free.
    pub voters: Vec<Uuid>,
    pub vote_count: u32,
}

impl VotingCandidate {
    pub fn new(movie_id: MovieId) -> Self {
        Self { movie_id, voters: Vec::new(), vote_count: 0 }
    }

    pub fn has_voted(&self, user_id: Uuid) -> bool {
        self.voters.contains(&user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VotingSession {
    pub is_active: bool,
    pub candidates: Vec<VotingCandidate>,
    pub ends_at: DateTime<Utc>,
    pub started_by: Uuid,
    pub started_at: DateTime<Utc>,
}

impl VotingSession {
    pub fn candidate(&self, movie_id: MovieId) -> Option<&VotingCandidate> {
        self.candidates.iter().find(|candidate| candidate.movie_id == movie_id)
    }

    pub fn candidate_ids(&self) -> Vec<MovieId> {
        self.candidates.iter().map(|candidate| candidate.movie_id).collect()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.ends_at
    }

    pub fn total_votes(&self) -> u32 {
        self.candidates.iter().map(|candidate| candidate.vote_count).sum()
    }
}

/// Notification categories, stored by their snake_case name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Follow,
    Recommendation,
    GroupInvite,
    VotingStarted,
    PostLike,
    Comment,
    GroupActivity,
}

impl NotificationKind {
    pub const ALL: [Self; 7] = [
        Self::Follow,
        Self::Recommendation,
        Self::GroupInvite,
        Self::VotingStarted,
        Self::PostLike,
        Self::Comment,
        Self::GroupActivity,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::Recommendation => "recommendation",
            Self::GroupInvite => "group_invite",
            Self::VotingStarted => "voting_started",
            Self::PostLike => "post_like",
            Self::Comment => "comment",
            Self::GroupActivity => "group_activity",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub kind: NotificationKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn member(user_id: Uuid, role: GroupRole) -> GroupMember {
        GroupMember { user_id, role, joined_at: Utc::now() }
    }

    fn group_with(members: Vec<GroupMember>, max_members: u32) -> Group {
        Group {
            id: Uuid::new_v4(),
            name: "Friday Night".into(),
            description: None,
            created_by: members[0].user_id,
            is_private: false,
            max_members,
            members,
            current_voting: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn admin_lookup_respects_role() {
        let admin = Uuid::new_v4();
        let regular = Uuid::new_v4();
        let group =
            group_with(vec![member(admin, GroupRole::Admin), member(regular, GroupRole::Member)], 5);

        assert!(group.is_admin(admin));
        assert!(!group.is_admin(regular));
        assert!(group.is_member(regular));
        assert!(!group.is_member(Uuid::new_v4()));
        assert_eq!(group.admins().count(), 1);
    }

    #[test]
    fn group_is_full_at_max_members() {
        let group = group_with(
            vec![member(Uuid::new_v4(), GroupRole::Admin), member(Uuid::new_v4(), GroupRole::Member)],
            2,
        );
        assert!(group.is_full());
    }

    #[test]
    fn session_expiry_is_inclusive_of_ends_at() {
        let now = Utc::now();
        let session = VotingSession {
            is_active: true,
            candidates: vec![VotingCandidate::new(101)],
            ends_at: now,
            started_by: Uuid::new_v4(),
            started_at: now - Duration::minutes(30),
        };

        assert!(session.is_expired(now));
        assert!(!session.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn notification_kind_db_values_round_trip() {
        for kind in NotificationKind::ALL {
            assert_eq!(NotificationKind::from_db_value(kind.as_str()), Some(kind));
        }
        assert_eq!(NotificationKind::from_db_value("unknown"), None);
    }

    #[test]
    fn notification_kind_serializes_snake_case() {
        let value = serde_json::to_value(NotificationKind::VotingStarted).unwrap();
        assert_eq!(value, "voting_started");
    }

    #[test]
    fn group_role_db_values() {
        assert_eq!(GroupRole::from_db_value("admin"), Some(GroupRole::Admin));
        assert_eq!(GroupRole::from_db_value("member"), Some(GroupRole::Member));
        assert_eq!(GroupRole::from_db_value("owner"), None);
    }
}
