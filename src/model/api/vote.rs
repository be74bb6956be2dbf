use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    api::id::ApiId,
    vote::{AnnotationKind, Vote, VoteStatus},
};

/// Request body for casting a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastVoteRequest {
    pub election_id: ApiId,
    pub position_id: ApiId,
    pub candidate_id: ApiId,
    #[serde(default)]
    pub token: Option<String>,
}

/// What a voter gets back for a recorded vote. Omits the link token and
/// request metadata stored on the ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub id: ApiId,
    pub election_id: ApiId,
    pub position_id: ApiId,
    pub candidate_id: ApiId,
    pub timestamp: DateTime<Utc>,
    pub verified: bool,
    pub status: VoteStatus,
}

impl From<Vote> for VoteReceipt {
    fn from(vote: Vote) -> Self {
        Self {
            id: vote.id.into(),
            election_id: vote.election_id.into(),
            position_id: vote.position_id.into(),
            candidate_id: vote.candidate_id.into(),
            timestamp: vote.timestamp,
            verified: vote.verified,
            status: vote.status,
        }
    }
}

/// Request body for disputing or invalidating a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRequest {
    pub reason: String,
}

/// Result of annotating a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedVote {
    pub id: ApiId,
    pub kind: AnnotationKind,
    pub status: VoteStatus,
    pub reason: String,
}

/// Which counter a reconciliation examined.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterScope {
    Candidate,
    Position,
    Election,
}

/// A counter whose value disagrees with the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub scope: CounterScope,
    pub id: ApiId,
    pub counter: u64,
    pub ledger: u64,
}

/// Result of recounting an election's ledger against its counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub election_id: ApiId,
    /// Votes with status `cast`, the only ones that count.
    pub counted_votes: u64,
    pub discrepancies: Vec<Discrepancy>,
    /// Whether the counters were rewritten to match the ledger.
    pub applied: bool,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }
}
