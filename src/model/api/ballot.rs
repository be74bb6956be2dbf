use serde::{Deserialize, Serialize};

use crate::model::{
    api::{
        election::{CandidateDescription, ElectionDescription},
        id::ApiId,
    },
    election::{Candidate, Position},
};

/// What a member may vote on, as seen through a valid voting link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallotView {
    pub election: ElectionDescription,
    pub positions: Vec<BallotPosition>,
    pub member_id: ApiId,
}

/// A position on the ballot, with the member's voting state for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallotPosition {
    pub id: ApiId,
    pub name: String,
    pub description: String,
    pub order: u32,
    pub candidates: Vec<CandidateDescription>,
    pub has_voted: bool,
}

impl BallotPosition {
    /// Build a ballot entry from a position and the candidates standing for it.
    /// Candidates that cannot receive votes are left off.
    pub fn new(position: Position, candidates: Vec<Candidate>, has_voted: bool) -> Self {
        Self {
            id: position.id.into(),
            name: position.name,
            description: position.description,
            order: position.order,
            candidates: candidates
                .into_iter()
                .filter(Candidate::is_eligible)
                .map(CandidateDescription::from)
                .collect(),
            has_voted,
        }
    }
}
