use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// A candidate standing for a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    pub position_id: Id,
    pub election_id: Id,
    pub name: String,
    pub bio: String,
    pub photo_url: Option<String>,
    pub is_active: bool,
    pub is_withdrawn: bool,
    /// Maintained exclusively by atomic increments during vote casting.
    pub votes_count: u64,
    /// Display value, refreshed after each vote.
    pub vote_percentage: f64,
    /// Display order; breaks ties between equal vote counts.
    pub order: u32,
}

impl Candidate {
    pub fn new(
        position_id: Id,
        election_id: Id,
        name: String,
        bio: String,
        photo_url: Option<String>,
        order: u32,
    ) -> Self {
        Self {
            id: Id::new(),
            position_id,
            election_id,
            name,
            bio,
            photo_url,
            is_active: true,
            is_withdrawn: false,
            votes_count: 0,
            vote_percentage: 0.0,
            order,
        }
    }

    /// Can this candidate currently receive votes?
    pub fn is_eligible(&self) -> bool {
        self.is_active && !self.is_withdrawn
    }
}
