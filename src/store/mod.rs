//! Storage seam for the voting core.
//!
//! Every operation runs against a [`Transaction`] opened from a [`Store`].
//! Writes become visible to other transactions only on
//! [`Transaction::commit`]; dropping or aborting a transaction discards them.
//!
//! The vote ledger is deliberately narrow: votes can be inserted and
//! annotated, but there is no way to update their cast fields or delete them.
//! Tally counters only move through [`Transaction::increment_tallies`], except
//! for the explicit reconciliation setters.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    audit::VotingLog,
    election::{Candidate, Election, ElectionStatus, Position},
    link::{LinkStatus, VotingLink},
    member::Member,
    mongodb::Id,
    vote::{Annotation, Vote, VoteStatus},
};

mod memory;
mod mongo;
#[cfg(test)]
mod stale;

pub use memory::MemoryStore;
pub use mongo::MongoStore;
#[cfg(test)]
pub use stale::StaleReads;

/// A source of transactions. Managed as Rocket state behind a `Box`.
#[rocket::async_trait]
pub trait Store: Send + Sync {
    /// Open a read-write transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Open a read-only view of a single point in time.
    async fn snapshot(&self) -> Result<Box<dyn Reader>>;
}

/// Fields written when an election changes status.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub status: ElectionStatus,
    pub approved_by: Option<Id>,
    pub total_eligible_voters: Option<u64>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl StatusChange {
    pub fn to(status: ElectionStatus) -> Self {
        Self {
            status,
            approved_by: None,
            total_eligible_voters: None,
            closed_at: None,
        }
    }
}

/// Read operations, shared by snapshots and transactions.
#[rocket::async_trait]
pub trait Reader: Send {
    async fn election(&mut self, id: Id) -> Result<Option<Election>>;

    /// Positions of an election in ballot order.
    async fn positions(&mut self, election_id: Id) -> Result<Vec<Position>>;

    async fn position(&mut self, id: Id) -> Result<Option<Position>>;

    /// Candidates for a position in display order.
    async fn candidates(&mut self, position_id: Id) -> Result<Vec<Candidate>>;

    async fn candidate(&mut self, id: Id) -> Result<Option<Candidate>>;

    async fn member(&mut self, id: Id) -> Result<Option<Member>>;

    /// Members of a chapter, or every member when `chapter` is `None`.
    async fn members_in(&mut self, chapter: Option<&str>) -> Result<Vec<Member>>;

    async fn vote(&mut self, id: Id) -> Result<Option<Vote>>;

    /// The member's vote for a position, whatever its status.
    async fn find_vote(&mut self, member_id: Id, position_id: Id, election_id: Id)
        -> Result<Option<Vote>>;

    /// Positions of an election the member has a ledger entry for.
    async fn voted_positions(&mut self, member_id: Id, election_id: Id) -> Result<Vec<Id>>;

    /// Votes with status `cast`, counted per candidate.
    async fn cast_counts(&mut self, election_id: Id) -> Result<HashMap<Id, u64>>;

    async fn link(&mut self, id: Id) -> Result<Option<VotingLink>>;

    async fn link_by_hash(&mut self, token_hash: &str) -> Result<Option<VotingLink>>;

    /// The member's pending or sent link for an election, if any.
    async fn live_link(&mut self, member_id: Id, election_id: Id) -> Result<Option<VotingLink>>;

    /// A page of an election's audit log, newest first, and the total entry count.
    async fn audit_log(
        &mut self,
        election_id: Id,
        skip: u64,
        limit: u32,
    ) -> Result<(u64, Vec<VotingLog>)>;
}

/// A read-write transaction.
#[rocket::async_trait]
pub trait Transaction: Reader {
    async fn insert_election(&mut self, election: &Election) -> Result<()>;

    async fn insert_position(&mut self, position: &Position) -> Result<()>;

    async fn insert_candidate(&mut self, candidate: &Candidate) -> Result<()>;

    /// Fails with [`Error::Constraint`](crate::error::Error::Constraint) if the
    /// token hash is taken or the member already has a live link.
    async fn insert_link(&mut self, link: &VotingLink) -> Result<()>;

    /// Append to the ledger. Fails with
    /// [`Error::DuplicateVote`](crate::error::Error::DuplicateVote) if the
    /// member already has a vote for the position.
    async fn insert_vote(&mut self, vote: &Vote) -> Result<()>;

    async fn insert_log(&mut self, log: &VotingLog) -> Result<()>;

    /// Atomically add one vote to a candidate, its position and its election.
    async fn increment_tallies(
        &mut self,
        candidate_id: Id,
        position_id: Id,
        election_id: Id,
    ) -> Result<()>;

    /// Change an election's status if it is currently `from`.
    /// Returns whether the election matched.
    async fn update_election_status(
        &mut self,
        id: Id,
        from: ElectionStatus,
        change: &StatusChange,
    ) -> Result<bool>;

    async fn withdraw_candidate(&mut self, id: Id) -> Result<bool>;

    /// Move a link from `from` to `to` if it is still in `from`.
    /// Leaving the live states releases the member's link slot.
    async fn transition_link(
        &mut self,
        id: Id,
        from: LinkStatus,
        to: LinkStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn record_link_access(&mut self, id: Id, at: DateTime<Utc>) -> Result<()>;

    /// Record a successful email, moving a pending link to sent.
    async fn record_link_email(&mut self, id: Id, at: DateTime<Utc>) -> Result<()>;

    /// Set the status and annotation of a vote currently in `from`.
    /// Cast fields are never touched.
    async fn annotate_vote(
        &mut self,
        id: Id,
        from: VoteStatus,
        to: VoteStatus,
        annotation: &Annotation,
    ) -> Result<bool>;

    async fn set_vote_percentage(&mut self, candidate_id: Id, percentage: f64) -> Result<()>;

    async fn set_turnout(&mut self, election_id: Id, percentage: f64) -> Result<()>;

    // Reconciliation only.
    async fn set_candidate_votes(&mut self, id: Id, votes: u64) -> Result<()>;
    async fn set_position_votes(&mut self, id: Id, votes: u64) -> Result<()>;
    async fn set_election_votes(&mut self, id: Id, votes: u64) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn abort(self: Box<Self>) -> Result<()>;
}
