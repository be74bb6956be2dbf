mod candidate;
mod election_core;
mod position;
mod state;

pub use candidate::Candidate;
pub use election_core::{percentage, Election, ElectionCore};
pub use position::Position;
pub use state::ElectionStatus;
