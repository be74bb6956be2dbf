use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    api::id::ApiId,
    election::{Candidate, Election, ElectionStatus, Position},
};

/// An API-friendly election description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionDescription {
    pub id: ApiId,
    pub title: String,
    pub description: String,
    pub chapter: Option<String>,
    pub status: ElectionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub require_verification: bool,
    pub allow_multiple_positions: bool,
    pub public_results: bool,
    pub total_eligible_voters: u64,
    pub total_votes_cast: u64,
    pub turnout_percentage: f64,
}

impl From<Election> for ElectionDescription {
    fn from(election: Election) -> Self {
        let core = election.election;
        Self {
            id: election.id.into(),
            title: core.title,
            description: core.description,
            chapter: core.chapter,
            status: core.status,
            start_time: core.start_time,
            end_time: core.end_time,
            require_verification: core.require_verification,
            allow_multiple_positions: core.allow_multiple_positions,
            public_results: core.public_results,
            total_eligible_voters: core.total_eligible_voters,
            total_votes_cast: core.total_votes_cast,
            turnout_percentage: core.turnout_percentage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionDescription {
    pub id: ApiId,
    pub election_id: ApiId,
    pub name: String,
    pub description: String,
    pub order: u32,
    pub total_votes: u64,
}

impl From<Position> for PositionDescription {
    fn from(position: Position) -> Self {
        Self {
            id: position.id.into(),
            election_id: position.election_id.into(),
            name: position.name,
            description: position.description,
            order: position.order,
            total_votes: position.total_votes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDescription {
    pub id: ApiId,
    pub position_id: ApiId,
    pub name: String,
    pub bio: String,
    pub photo_url: Option<String>,
    pub is_active: bool,
    pub is_withdrawn: bool,
    pub votes_count: u64,
    pub vote_percentage: f64,
    pub order: u32,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id.into(),
            position_id: candidate.position_id.into(),
            name: candidate.name,
            bio: candidate.bio,
            photo_url: candidate.photo_url,
            is_active: candidate.is_active,
            is_withdrawn: candidate.is_withdrawn,
            votes_count: candidate.votes_count,
            vote_percentage: candidate.vote_percentage,
            order: candidate.order,
        }
    }
}

/// Everything an organiser supplies to create an election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub chapter: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub require_verification: bool,
    #[serde(default)]
    pub allow_multiple_positions: bool,
    #[serde(default)]
    pub public_results: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub name: String,
    #[serde(default)]
    pub bio: String,
    pub photo_url: Option<String>,
    pub order: u32,
}
