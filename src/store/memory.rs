use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocket::tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};
use crate::model::{
    audit::VotingLog,
    election::{Candidate, Election, ElectionStatus, Position},
    link::{LinkStatus, VotingLink},
    member::Member,
    mongodb::Id,
    vote::{Annotation, Vote, VoteStatus},
};

use super::{Reader, StatusChange, Store, Transaction};

/// Everything the in-memory store holds.
#[derive(Debug, Clone, Default)]
struct State {
    elections: HashMap<Id, Election>,
    positions: HashMap<Id, Position>,
    candidates: HashMap<Id, Candidate>,
    members: HashMap<Id, Member>,
    links: HashMap<Id, VotingLink>,
    votes: HashMap<Id, Vote>,
    logs: Vec<VotingLog>,
}

/// A process-local store, used for development and tests.
///
/// Transactions are serialised: each one holds the lock from `begin` until it
/// is committed or dropped, and works on a private copy of the state that
/// replaces the shared state on commit. This gives the same all-or-nothing
/// behaviour and unique-key guarantees as the MongoDB store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a member in the directory.
    pub async fn seed_member(&self, member: Member) {
        self.state.lock().await.members.insert(member.id, member);
    }
}

#[rocket::async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemorySession {
            guard: Some(guard),
            state: staged,
        }))
    }

    async fn snapshot(&self) -> Result<Box<dyn Reader>> {
        let state = self.state.lock().await.clone();
        Ok(Box::new(MemorySession { guard: None, state }))
    }
}

/// A transaction (holding the lock) or a detached snapshot (not holding it).
struct MemorySession {
    guard: Option<OwnedMutexGuard<State>>,
    state: State,
}

impl MemorySession {
    fn election_mut(&mut self, id: Id) -> Option<&mut Election> {
        self.state.elections.get_mut(&id)
    }
}

#[rocket::async_trait]
impl Reader for MemorySession {
    async fn election(&mut self, id: Id) -> Result<Option<Election>> {
        Ok(self.state.elections.get(&id).cloned())
    }

    async fn positions(&mut self, election_id: Id) -> Result<Vec<Position>> {
        let mut positions: Vec<_> = self
            .state
            .positions
            .values()
            .filter(|p| p.election_id == election_id)
            .cloned()
            .collect();
        positions.sort_by_key(|p| (p.order, p.id));
        Ok(positions)
    }

    async fn position(&mut self, id: Id) -> Result<Option<Position>> {
        Ok(self.state.positions.get(&id).cloned())
    }

    async fn candidates(&mut self, position_id: Id) -> Result<Vec<Candidate>> {
        let mut candidates: Vec<_> = self
            .state
            .candidates
            .values()
            .filter(|c| c.position_id == position_id)
            .cloned()
            .collect();
        candidates.sort_by_key(|c| (c.order, c.id));
        Ok(candidates)
    }

    async fn candidate(&mut self, id: Id) -> Result<Option<Candidate>> {
        Ok(self.state.candidates.get(&id).cloned())
    }

    async fn member(&mut self, id: Id) -> Result<Option<Member>> {
        Ok(self.state.members.get(&id).cloned())
    }

    async fn members_in(&mut self, chapter: Option<&str>) -> Result<Vec<Member>> {
        let mut members: Vec<_> = self
            .state
            .members
            .values()
            .filter(|m| chapter.is_none() || m.chapter.as_deref() == chapter)
            .cloned()
            .collect();
        members.sort_by_key(|m| m.id);
        Ok(members)
    }

    async fn vote(&mut self, id: Id) -> Result<Option<Vote>> {
        Ok(self.state.votes.get(&id).cloned())
    }

    async fn find_vote(
        &mut self,
        member_id: Id,
        position_id: Id,
        election_id: Id,
    ) -> Result<Option<Vote>> {
        Ok(self
            .state
            .votes
            .values()
            .find(|v| {
                v.member_id == member_id
                    && v.position_id == position_id
                    && v.election_id == election_id
            })
            .cloned())
    }

    async fn voted_positions(&mut self, member_id: Id, election_id: Id) -> Result<Vec<Id>> {
        Ok(self
            .state
            .votes
            .values()
            .filter(|v| v.member_id == member_id && v.election_id == election_id)
            .map(|v| v.position_id)
            .collect())
    }

    async fn cast_counts(&mut self, election_id: Id) -> Result<HashMap<Id, u64>> {
        let mut counts = HashMap::new();
        for vote in self.state.votes.values() {
            if vote.election_id == election_id && vote.status == VoteStatus::Cast {
                *counts.entry(vote.candidate_id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn link(&mut self, id: Id) -> Result<Option<VotingLink>> {
        Ok(self.state.links.get(&id).cloned())
    }

    async fn link_by_hash(&mut self, token_hash: &str) -> Result<Option<VotingLink>> {
        Ok(self
            .state
            .links
            .values()
            .find(|l| l.token_hash == token_hash)
            .cloned())
    }

    async fn live_link(&mut self, member_id: Id, election_id: Id) -> Result<Option<VotingLink>> {
        Ok(self
            .state
            .links
            .values()
            .find(|l| {
                l.member_id == member_id && l.election_id == election_id && !l.status.is_terminal()
            })
            .cloned())
    }

    async fn audit_log(
        &mut self,
        election_id: Id,
        skip: u64,
        limit: u32,
    ) -> Result<(u64, Vec<VotingLog>)> {
        let mut logs: Vec<_> = self
            .state
            .logs
            .iter()
            .filter(|l| l.election_id == Some(election_id))
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let total = logs.len() as u64;
        let page = logs
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect();
        Ok((total, page))
    }
}

#[rocket::async_trait]
impl Transaction for MemorySession {
    async fn insert_election(&mut self, election: &Election) -> Result<()> {
        self.state.elections.insert(election.id, election.clone());
        Ok(())
    }

    async fn insert_position(&mut self, position: &Position) -> Result<()> {
        self.state.positions.insert(position.id, position.clone());
        Ok(())
    }

    async fn insert_candidate(&mut self, candidate: &Candidate) -> Result<()> {
        self.state.candidates.insert(candidate.id, candidate.clone());
        Ok(())
    }

    async fn insert_link(&mut self, link: &VotingLink) -> Result<()> {
        for existing in self.state.links.values() {
            if existing.token_hash == link.token_hash {
                return Err(Error::Constraint("voting link token".to_string()));
            }
            if link.active_slot.is_some() && existing.active_slot == link.active_slot {
                return Err(Error::Constraint("live voting link".to_string()));
            }
        }
        self.state.links.insert(link.id, link.clone());
        Ok(())
    }

    async fn insert_vote(&mut self, vote: &Vote) -> Result<()> {
        let duplicate = self.state.votes.values().any(|v| {
            v.member_id == vote.member_id
                && v.position_id == vote.position_id
                && v.election_id == vote.election_id
        });
        if duplicate {
            return Err(Error::DuplicateVote);
        }
        self.state.votes.insert(vote.id, vote.clone());
        Ok(())
    }

    async fn insert_log(&mut self, log: &VotingLog) -> Result<()> {
        self.state.logs.push(log.clone());
        Ok(())
    }

    async fn increment_tallies(
        &mut self,
        candidate_id: Id,
        position_id: Id,
        election_id: Id,
    ) -> Result<()> {
        if let Some(candidate) = self.state.candidates.get_mut(&candidate_id) {
            candidate.votes_count += 1;
        }
        if let Some(position) = self.state.positions.get_mut(&position_id) {
            position.total_votes += 1;
        }
        if let Some(election) = self.election_mut(election_id) {
            election.total_votes_cast += 1;
        }
        Ok(())
    }

    async fn update_election_status(
        &mut self,
        id: Id,
        from: ElectionStatus,
        change: &StatusChange,
    ) -> Result<bool> {
        let election = match self.election_mut(id) {
            Some(election) if election.status == from => election,
            _ => return Ok(false),
        };
        election.status = change.status;
        if let Some(approved_by) = change.approved_by {
            election.approved_by = Some(approved_by);
        }
        if let Some(eligible) = change.total_eligible_voters {
            election.total_eligible_voters = eligible;
        }
        if let Some(closed_at) = change.closed_at {
            election.closed_at = Some(closed_at);
        }
        Ok(true)
    }

    async fn withdraw_candidate(&mut self, id: Id) -> Result<bool> {
        match self.state.candidates.get_mut(&id) {
            Some(candidate) => {
                candidate.is_withdrawn = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn transition_link(
        &mut self,
        id: Id,
        from: LinkStatus,
        to: LinkStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let link = match self.state.links.get_mut(&id) {
            Some(link) if link.status == from => link,
            _ => return Ok(false),
        };
        link.status = to;
        if to.is_terminal() {
            link.active_slot = None;
        }
        if to == LinkStatus::Used {
            link.used_at = Some(at);
        }
        Ok(true)
    }

    async fn record_link_access(&mut self, id: Id, at: DateTime<Utc>) -> Result<()> {
        if let Some(link) = self.state.links.get_mut(&id) {
            link.access_count += 1;
            link.accessed_at = Some(at);
        }
        Ok(())
    }

    async fn record_link_email(&mut self, id: Id, at: DateTime<Utc>) -> Result<()> {
        if let Some(link) = self.state.links.get_mut(&id) {
            link.email_sent = true;
            link.email_sent_at = Some(at);
            if link.status == LinkStatus::Pending {
                link.status = LinkStatus::Sent;
            }
        }
        Ok(())
    }

    async fn annotate_vote(
        &mut self,
        id: Id,
        from: VoteStatus,
        to: VoteStatus,
        annotation: &Annotation,
    ) -> Result<bool> {
        match self.state.votes.get_mut(&id) {
            Some(vote) if vote.status == from => {
                vote.status = to;
                vote.annotation = Some(annotation.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_vote_percentage(&mut self, candidate_id: Id, percentage: f64) -> Result<()> {
        if let Some(candidate) = self.state.candidates.get_mut(&candidate_id) {
            candidate.vote_percentage = percentage;
        }
        Ok(())
    }

    async fn set_turnout(&mut self, election_id: Id, percentage: f64) -> Result<()> {
        if let Some(election) = self.election_mut(election_id) {
            election.turnout_percentage = percentage;
        }
        Ok(())
    }

    async fn set_candidate_votes(&mut self, id: Id, votes: u64) -> Result<()> {
        if let Some(candidate) = self.state.candidates.get_mut(&id) {
            candidate.votes_count = votes;
        }
        Ok(())
    }

    async fn set_position_votes(&mut self, id: Id, votes: u64) -> Result<()> {
        if let Some(position) = self.state.positions.get_mut(&id) {
            position.total_votes = votes;
        }
        Ok(())
    }

    async fn set_election_votes(&mut self, id: Id, votes: u64) -> Result<()> {
        if let Some(election) = self.election_mut(id) {
            election.total_votes_cast = votes;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemorySession { guard, state } = *self;
        if let Some(mut guard) = guard {
            *guard = state;
        }
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
