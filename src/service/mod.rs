//! The voting core: link issuance and validation, exactly-once vote casting,
//! tallies and the audit trail, on top of a [`Store`].

use std::sync::Arc;

use crate::model::link::TokenCodec;
use crate::notify::{Broadcaster, Mailer};
use crate::store::Store;

mod audit;
mod casting;
mod elections;
mod ledger;
mod links;
mod results;
mod validation;

pub use casting::CastVote;

/// Shared handle on the voting core. Cheap to clone.
#[derive(Clone)]
pub struct Voting {
    store: Arc<dyn Store>,
    codec: TokenCodec,
    mailer: Arc<dyn Mailer>,
    broadcaster: Broadcaster,
    /// Base URL of the ballot page; tokens are appended as `?token=`.
    voting_url: String,
}

impl Voting {
    pub fn new(
        store: Arc<dyn Store>,
        codec: TokenCodec,
        mailer: Arc<dyn Mailer>,
        broadcaster: Broadcaster,
        voting_url: String,
    ) -> Self {
        Self {
            store,
            codec,
            mailer,
            broadcaster,
            voting_url,
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    fn vote_url(&self, token: &str) -> String {
        format!("{}?token={token}", self.voting_url)
    }
}
