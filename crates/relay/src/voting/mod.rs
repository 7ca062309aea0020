// Group voting state machine.
//
// A group holds at most one session. Starting replaces whatever was there;
// votes only land on an active, unexpired (under the enforcing policy) session.
// These functions mutate a loaded `Group` and are shared by the in-memory
// store and by the Postgres store when it classifies a rejected vote.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use reelcircle_common::types::{Group, MovieId, VotingCandidate, VotingSession};
use thiserror::Error;
use uuid::Uuid;

pub const MIN_DURATION_MINUTES: i64 = 1;
/// One week.
pub const MAX_DURATION_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VotingPolicy {
    /// When false, `ends_at` is advisory and votes keep landing after it.
    pub enforce_expiry: bool,
}

impl Default for VotingPolicy {
    fn default() -> Self {
        Self { enforce_expiry: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VotingError {
    #[error("at least one candidate movie is required")]
    NoCandidates,
    #[error("movie {0} is listed more than once")]
    DuplicateCandidate(MovieId),
    #[error("duration must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES} minutes, got {0}")]
    InvalidDuration(i64),
    #[error("only group admins can start voting")]
    NotAdmin,
    #[error("only group members can vote")]
    NotMember,
    #[error("no active voting session")]
    Inactive,
    #[error("voting has ended")]
    Ended,
    #[error("movie {0} is not a candidate in this session")]
    UnknownCandidate(MovieId),
    #[error("already voted for movie {0}")]
    DuplicateVote(MovieId),
}

/// Result of a successful start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub session: VotingSession,
    /// The group had a still-active session that this start discarded.
    pub replaced_active: bool,
}

/// Result of a successful vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    pub session: VotingSession,
    pub movie_id: MovieId,
    pub vote_count: u32,
}

pub fn validate_start(candidates: &[MovieId], duration_minutes: i64) -> Result<(), VotingError> {
    if candidates.is_empty() {
        return Err(VotingError::NoCandidates);
    }

    let mut seen = HashSet::with_capacity(candidates.len());
    for movie_id in candidates {
        if !seen.insert(*movie_id) {
            return Err(VotingError::DuplicateCandidate(*movie_id));
        }
    }

    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&duration_minutes) {
        return Err(VotingError::InvalidDuration(duration_minutes));
    }

    Ok(())
}

pub fn authorize_start(group: &Group, requester_id: Uuid) -> Result<(), VotingError> {
    if group.is_admin(requester_id) {
        Ok(())
    } else {
        Err(VotingError::NotAdmin)
    }
}

/// Builds a fresh session with zeroed tallies.
pub fn new_session(
    candidates: &[MovieId],
    duration_minutes: i64,
    started_by: Uuid,
    now: DateTime<Utc>,
) -> VotingSession {
    VotingSession {
        is_active: true,
        candidates: candidates.iter().copied().map(VotingCandidate::new).collect(),
        ends_at: now + Duration::minutes(duration_minutes),
        started_by,
        started_at: now,
    }
}

/// Authorizes, validates and installs a new session, discarding any previous one.
///
/// On error the group is left untouched.
pub fn start_session(
    group: &mut Group,
    requester_id: Uuid,
    candidates: &[MovieId],
    duration_minutes: i64,
    now: DateTime<Utc>,
) -> Result<StartOutcome, VotingError> {
    authorize_start(group, requester_id)?;
    validate_start(candidates, duration_minutes)?;

    let replaced_active = group.current_voting.as_ref().is_some_and(|session| session.is_active);
    let session = new_session(candidates, duration_minutes, requester_id, now);
    group.current_voting = Some(session.clone());

    Ok(StartOutcome { session, replaced_active })
}

/// Checks every precondition of a vote without mutating anything.
pub fn check_vote(
    group: &Group,
    movie_id: MovieId,
    voter_id: Uuid,
    policy: VotingPolicy,
    now: DateTime<Utc>,
) -> Result<(), VotingError> {
    if !group.is_member(voter_id) {
        return Err(VotingError::NotMember);
    }

    let session = match group.current_voting.as_ref() {
        Some(session) if session.is_active => session,
        _ => return Err(VotingError::Inactive),
    };

    if policy.enforce_expiry && session.is_expired(now) {
        return Err(VotingError::Ended);
    }

    let candidate = session.candidate(movie_id).ok_or(VotingError::UnknownCandidate(movie_id))?;
    if candidate.has_voted(voter_id) {
        return Err(VotingError::DuplicateVote(movie_id));
    }

    Ok(())
}

/// Records one vote. The tally is recomputed from the voter list so the
/// count can never drift from it.
pub fn apply_vote(
    group: &mut Group,
    movie_id: MovieId,
    voter_id: Uuid,
    policy: VotingPolicy,
    now: DateTime<Utc>,
) -> Result<VoteOutcome, VotingError> {
    check_vote(group, movie_id, voter_id, policy, now)?;

    let session = group.current_voting.as_mut().ok_or(VotingError::Inactive)?;
    let candidate = session
        .candidates
        .iter_mut()
        .find(|candidate| candidate.movie_id == movie_id)
        .ok_or(VotingError::UnknownCandidate(movie_id))?;

    candidate.voters.push(voter_id);
    candidate.vote_count = u32::try_from(candidate.voters.len()).unwrap_or(u32::MAX);
    let vote_count = candidate.vote_count;

    Ok(VoteOutcome { session: session.clone(), movie_id, vote_count })
}

/// Candidates sharing the highest vote count, in ballot order.
///
/// Ties are not broken. Before the first vote every candidate leads.
pub fn leading_candidates(session: &VotingSession) -> Vec<&VotingCandidate> {
    let Some(top) = session.candidates.iter().map(|candidate| candidate.vote_count).max() else {
        return Vec::new();
    };

    session.candidates.iter().filter(|candidate| candidate.vote_count == top).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcircle_common::types::{GroupMember, GroupRole};

    fn user(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn admin_id() -> Uuid {
        user(1)
    }

    fn group() -> Group {
        let now = Utc::now();
        let members = [(admin_id(), GroupRole::Admin), (user(2), GroupRole::Member), (user(3), GroupRole::Member)]
            .into_iter()
            .map(|(user_id, role)| GroupMember { user_id, role, joined_at: now })
            .collect();
        Group {
            id: Uuid::from_u128(100),
            name: "Film Club".into(),
            description: None,
            created_by: admin_id(),
            is_private: false,
            max_members: 50,
            members,
            current_voting: None,
            created_at: now,
        }
    }

    fn started(candidates: &[MovieId]) -> (Group, DateTime<Utc>) {
        let mut group = group();
        let now = Utc::now();
        start_session(&mut group, admin_id(), candidates, 30, now).expect("admin start should succeed");
        (group, now)
    }

    #[test]
    fn start_validation_rules() {
        assert_eq!(validate_start(&[], 30), Err(VotingError::NoCandidates));
        assert_eq!(validate_start(&[7, 8, 7], 30), Err(VotingError::DuplicateCandidate(7)));
        assert_eq!(validate_start(&[7], 0), Err(VotingError::InvalidDuration(0)));
        assert_eq!(validate_start(&[7], 10_081), Err(VotingError::InvalidDuration(10_081)));
        assert!(validate_start(&[7], 1).is_ok());
        assert!(validate_start(&[7], 10_080).is_ok());
    }

    #[test]
    fn admin_start_sets_window_and_zero_tallies() {
        let (group, now) = started(&[101, 102]);
        let session = group.current_voting.expect("session should be installed");

        assert!(session.is_active);
        assert_eq!(session.candidate_ids(), vec![101, 102]);
        assert_eq!(session.ends_at, now + Duration::minutes(30));
        assert_eq!(session.started_by, admin_id());
        assert_eq!(session.total_votes(), 0);
    }

    #[test]
    fn non_admin_start_leaves_existing_session_untouched() {
        let (mut group, now) = started(&[101, 102]);
        apply_vote(&mut group, 101, user(2), VotingPolicy::default(), now).unwrap();
        let before = group.current_voting.clone();

        let result = start_session(&mut group, user(2), &[999], 10, now);

        assert_eq!(result, Err(VotingError::NotAdmin));
        assert_eq!(group.current_voting, before);
    }

    #[test]
    fn admin_restart_discards_prior_tallies() {
        let (mut group, now) = started(&[101, 102]);
        apply_vote(&mut group, 101, user(2), VotingPolicy::default(), now).unwrap();

        let outcome = start_session(&mut group, admin_id(), &[101, 300], 60, now).unwrap();

        assert!(outcome.replaced_active);
        assert_eq!(outcome.session.candidate(101).map(|c| c.vote_count), Some(0));
        assert_eq!(group.current_voting.as_ref().map(|s| s.total_votes()), Some(0));
    }

    #[test]
    fn two_voters_across_two_candidates() {
        let (mut group, now) = started(&[101, 102]);
        let policy = VotingPolicy::default();

        apply_vote(&mut group, 101, user(2), policy, now).unwrap();
        apply_vote(&mut group, 101, user(3), policy, now).unwrap();
        let outcome = apply_vote(&mut group, 102, user(2), policy, now).unwrap();

        assert_eq!(outcome.movie_id, 102);
        assert_eq!(outcome.vote_count, 1);
        let session = outcome.session;
        assert_eq!(session.candidate(101).map(|c| c.voters.clone()), Some(vec![user(2), user(3)]));
        assert_eq!(session.candidate(101).map(|c| c.vote_count), Some(2));
        assert_eq!(session.candidate(102).map(|c| c.vote_count), Some(1));

        let leaders: Vec<MovieId> = leading_candidates(&session).iter().map(|c| c.movie_id).collect();
        assert_eq!(leaders, vec![101]);
    }

    #[test]
    fn repeat_vote_is_rejected_without_changing_state() {
        let (mut group, now) = started(&[101, 102]);
        apply_vote(&mut group, 101, user(2), VotingPolicy::default(), now).unwrap();
        let before = group.current_voting.clone();

        let result = apply_vote(&mut group, 101, user(2), VotingPolicy::default(), now);

        assert_eq!(result, Err(VotingError::DuplicateVote(101)));
        assert_eq!(group.current_voting, before);
    }

    #[test]
    fn vote_rejections_in_precondition_order() {
        let mut fresh = group();
        let now = Utc::now();
        let policy = VotingPolicy::default();

        assert_eq!(apply_vote(&mut fresh, 101, user(99), policy, now), Err(VotingError::NotMember));
        assert_eq!(apply_vote(&mut fresh, 101, user(2), policy, now), Err(VotingError::Inactive));

        let (mut group, now) = started(&[101]);
        assert_eq!(
            apply_vote(&mut group, 555, user(2), policy, now),
            Err(VotingError::UnknownCandidate(555))
        );

        if let Some(session) = group.current_voting.as_mut() {
            session.is_active = false;
        }
        assert_eq!(apply_vote(&mut group, 101, user(2), policy, now), Err(VotingError::Inactive));
    }

    #[test]
    fn enforcing_policy_rejects_votes_after_ends_at() {
        let (mut group, now) = started(&[101]);
        let after_end = now + Duration::minutes(30);

        let result = apply_vote(&mut group, 101, user(2), VotingPolicy { enforce_expiry: true }, after_end);

        assert_eq!(result, Err(VotingError::Ended));
        assert_eq!(group.current_voting.as_ref().map(|s| s.total_votes()), Some(0));
    }

    #[test]
    fn advisory_policy_accepts_votes_after_ends_at() {
        let (mut group, now) = started(&[101]);
        let after_end = now + Duration::hours(5);

        let outcome = apply_vote(&mut group, 101, user(2), VotingPolicy { enforce_expiry: false }, after_end)
            .expect("advisory expiry should accept the vote");

        assert_eq!(outcome.vote_count, 1);
    }

    #[test]
    fn ties_are_reported_in_ballot_order() {
        let (mut group, now) = started(&[300, 200, 100]);
        let policy = VotingPolicy::default();
        apply_vote(&mut group, 100, user(2), policy, now).unwrap();
        apply_vote(&mut group, 300, user(3), policy, now).unwrap();

        let session = group.current_voting.expect("session should exist");
        let leaders: Vec<MovieId> = leading_candidates(&session).iter().map(|c| c.movie_id).collect();
        assert_eq!(leaders, vec![300, 100]);
    }
}
