use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// One electable office within an election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "_id")]
    pub id: Id,
    pub election_id: Id,
    pub name: String,
    pub description: String,
    /// Display order within the ballot.
    pub order: u32,
    /// Maintained exclusively by atomic increments during vote casting.
    pub total_votes: u64,
}

impl Position {
    pub fn new(election_id: Id, name: String, description: String, order: u32) -> Self {
        Self {
            id: Id::new(),
            election_id,
            name,
            description,
            order,
            total_votes: 0,
        }
    }
}
