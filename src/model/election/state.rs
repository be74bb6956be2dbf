use std::fmt::Display;

use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// States in the Election lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionStatus {
    /// Created by an organiser, awaiting approval.
    Pending,
    /// Approved by a privileged actor; links may be issued.
    Approved,
    /// Open for voting within its window.
    Active,
    /// Finished; tallies are final.
    Closed,
    /// Abandoned before closing.
    Cancelled,
}

impl ElectionStatus {
    /// Is `next` a legal successor of this state?
    pub fn can_transition_to(self, next: ElectionStatus) -> bool {
        use ElectionStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Approved, Active)
                | (Active, Closed)
                | (Pending | Approved | Active, Cancelled)
        )
    }

    /// Closed and cancelled elections never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ElectionStatus::Closed | ElectionStatus::Cancelled)
    }

    /// Can the ballot (positions, candidates) still be edited?
    pub fn is_editable(self) -> bool {
        matches!(self, ElectionStatus::Pending | ElectionStatus::Approved)
    }
}

impl Display for ElectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ElectionStatus::Pending => "pending",
            ElectionStatus::Approved => "approved",
            ElectionStatus::Active => "active",
            ElectionStatus::Closed => "closed",
            ElectionStatus::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

impl From<ElectionStatus> for Bson {
    fn from(state: ElectionStatus) -> Self {
        to_bson(&state).expect("Serialisation is infallible")
    }
}
