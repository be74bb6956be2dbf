//! A store whose reads can be made to miss, so tests can drive the write-side
//! conflict paths that a concurrent writer would otherwise trigger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{MemoryStore, Reader, StatusChange, Store, Transaction};
use crate::error::Result;
use crate::model::{
    audit::VotingLog,
    election::{Candidate, Election, ElectionStatus, Position},
    link::{LinkStatus, VotingLink},
    member::Member,
    mongodb::Id,
    vote::{Annotation, Vote, VoteStatus},
};

#[derive(Default)]
struct Staleness {
    live_link_misses: AtomicUsize,
    votes: AtomicBool,
}

/// Wraps a [`MemoryStore`], hiding rows from transactional reads on request.
#[derive(Clone)]
pub struct StaleReads {
    inner: MemoryStore,
    staleness: Arc<Staleness>,
}

impl StaleReads {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            staleness: Arc::default(),
        }
    }

    /// The next `n` live link lookups find nothing.
    pub fn miss_live_links(&self, n: usize) {
        self.staleness.live_link_misses.store(n, Ordering::SeqCst);
    }

    /// Vote lookups find nothing until further notice.
    pub fn hide_votes(&self) {
        self.staleness.votes.store(true, Ordering::SeqCst);
    }
}

#[rocket::async_trait]
impl Store for StaleReads {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(StaleTransaction {
            inner: self.inner.begin().await?,
            staleness: self.staleness.clone(),
        }))
    }

    async fn snapshot(&self) -> Result<Box<dyn Reader>> {
        self.inner.snapshot().await
    }
}

struct StaleTransaction {
    inner: Box<dyn Transaction>,
    staleness: Arc<Staleness>,
}

#[rocket::async_trait]
impl Reader for StaleTransaction {
    async fn election(&mut self, id: Id) -> Result<Option<Election>> {
        self.inner.election(id).await
    }

    async fn positions(&mut self, election_id: Id) -> Result<Vec<Position>> {
        self.inner.positions(election_id).await
    }

    async fn position(&mut self, id: Id) -> Result<Option<Position>> {
        self.inner.position(id).await
    }

    async fn candidates(&mut self, position_id: Id) -> Result<Vec<Candidate>> {
        self.inner.candidates(position_id).await
    }

    async fn candidate(&mut self, id: Id) -> Result<Option<Candidate>> {
        self.inner.candidate(id).await
    }

    async fn member(&mut self, id: Id) -> Result<Option<Member>> {
        self.inner.member(id).await
    }

    async fn members_in(&mut self, chapter: Option<&str>) -> Result<Vec<Member>> {
        self.inner.members_in(chapter).await
    }

    async fn vote(&mut self, id: Id) -> Result<Option<Vote>> {
        self.inner.vote(id).await
    }

    async fn find_vote(
        &mut self,
        member_id: Id,
        position_id: Id,
        election_id: Id,
    ) -> Result<Option<Vote>> {
        if self.staleness.votes.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner
            .find_vote(member_id, position_id, election_id)
            .await
    }

    async fn voted_positions(&mut self, member_id: Id, election_id: Id) -> Result<Vec<Id>> {
        self.inner.voted_positions(member_id, election_id).await
    }

    async fn cast_counts(&mut self, election_id: Id) -> Result<HashMap<Id, u64>> {
        self.inner.cast_counts(election_id).await
    }

    async fn link(&mut self, id: Id) -> Result<Option<VotingLink>> {
        self.inner.link(id).await
    }

    async fn link_by_hash(&mut self, token_hash: &str) -> Result<Option<VotingLink>> {
        self.inner.link_by_hash(token_hash).await
    }

    async fn live_link(&mut self, member_id: Id, election_id: Id) -> Result<Option<VotingLink>> {
        let missed = self
            .staleness
            .live_link_misses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if missed {
            return Ok(None);
        }
        self.inner.live_link(member_id, election_id).await
    }

    async fn audit_log(
        &mut self,
        election_id: Id,
        skip: u64,
        limit: u32,
    ) -> Result<(u64, Vec<VotingLog>)> {
        self.inner.audit_log(election_id, skip, limit).await
    }
}

#[rocket::async_trait]
impl Transaction for StaleTransaction {
    async fn insert_election(&mut self, election: &Election) -> Result<()> {
        self.inner.insert_election(election).await
    }

    async fn insert_position(&mut self, position: &Position) -> Result<()> {
        self.inner.insert_position(position).await
    }

    async fn insert_candidate(&mut self, candidate: &Candidate) -> Result<()> {
        self.inner.insert_candidate(candidate).await
    }

    async fn insert_link(&mut self, link: &VotingLink) -> Result<()> {
        self.inner.insert_link(link).await
    }

    async fn insert_vote(&mut self, vote: &Vote) -> Result<()> {
        self.inner.insert_vote(vote).await
    }

    async fn insert_log(&mut self, log: &VotingLog) -> Result<()> {
        self.inner.insert_log(log).await
    }

    async fn increment_tallies(
        &mut self,
        candidate_id: Id,
        position_id: Id,
        election_id: Id,
    ) -> Result<()> {
        self.inner
            .increment_tallies(candidate_id, position_id, election_id)
            .await
    }

    async fn update_election_status(
        &mut self,
        id: Id,
        from: ElectionStatus,
        change: &StatusChange,
    ) -> Result<bool> {
        self.inner.update_election_status(id, from, change).await
    }

    async fn withdraw_candidate(&mut self, id: Id) -> Result<bool> {
        self.inner.withdraw_candidate(id).await
    }

    async fn transition_link(
        &mut self,
        id: Id,
        from: LinkStatus,
        to: LinkStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.transition_link(id, from, to, at).await
    }

    async fn record_link_access(&mut self, id: Id, at: DateTime<Utc>) -> Result<()> {
        self.inner.record_link_access(id, at).await
    }

    async fn record_link_email(&mut self, id: Id, at: DateTime<Utc>) -> Result<()> {
        self.inner.record_link_email(id, at).await
    }

    async fn annotate_vote(
        &mut self,
        id: Id,
        from: VoteStatus,
        to: VoteStatus,
        annotation: &Annotation,
    ) -> Result<bool> {
        self.inner.annotate_vote(id, from, to, annotation).await
    }

    async fn set_vote_percentage(&mut self, candidate_id: Id, percentage: f64) -> Result<()> {
        self.inner.set_vote_percentage(candidate_id, percentage).await
    }

    async fn set_turnout(&mut self, election_id: Id, percentage: f64) -> Result<()> {
        self.inner.set_turnout(election_id, percentage).await
    }

    async fn set_candidate_votes(&mut self, id: Id, votes: u64) -> Result<()> {
        self.inner.set_candidate_votes(id, votes).await
    }

    async fn set_position_votes(&mut self, id: Id, votes: u64) -> Result<()> {
        self.inner.set_position_votes(id, votes).await
    }

    async fn set_election_votes(&mut self, id: Id, votes: u64) -> Result<()> {
        self.inner.set_election_votes(id, votes).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        self.inner.abort().await
    }
}
