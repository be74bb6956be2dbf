use chrono::{DateTime, Utc};
use rocket::tokio::sync::broadcast::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::model::{api::ApiId, mongodb::Id};

/// Notification that a position's tally has changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteUpdate {
    pub election_id: ApiId,
    pub position_id: ApiId,
    pub candidate_id: ApiId,
    pub at: DateTime<Utc>,
}

/// Fans vote updates out to connected result viewers.
///
/// Slow receivers lag and miss updates rather than holding up senders.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    sender: Sender<VoteUpdate>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Fire and forget.
    pub fn emit_vote_update(&self, election_id: Id, position_id: Id, candidate_id: Id) {
        let update = VoteUpdate {
            election_id: election_id.into(),
            position_id: position_id.into(),
            candidate_id: candidate_id.into(),
            at: Utc::now(),
        };
        // Only fails when nobody is listening.
        if self.sender.send(update).is_err() {
            debug!("No live viewers for election {election_id}");
        }
    }

    pub fn subscribe(&self) -> Receiver<VoteUpdate> {
        self.sender.subscribe()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
