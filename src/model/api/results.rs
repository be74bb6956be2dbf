use serde::{Deserialize, Serialize};

use crate::model::api::election::{
    CandidateDescription, ElectionDescription, PositionDescription,
};

/// A point-in-time tally of an election, read from the maintained counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionResults {
    pub election: ElectionDescription,
    pub positions: Vec<PositionResults>,
}

/// The candidates for one position, ranked by votes received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionResults {
    pub position: PositionDescription,
    pub candidates: Vec<CandidateDescription>,
}
