use std::collections::HashSet;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::model::{
    api::ballot::{BallotPosition, BallotView},
    audit::{AuditAction, AuditContext, VotingLog},
    link::TokenCodec,
    mongodb::Id,
};
use crate::store::{Reader, Transaction};

use super::{links::settle_expiry, Voting};

impl Voting {
    /// Check a voting link and return the ballot it grants access to, with
    /// the positions the member has already voted on flagged.
    ///
    /// Forged or garbled tokens are rejected before the store is consulted.
    pub async fn validate_voting_link(
        &self,
        token: &str,
        member_id: Option<Id>,
        ctx: &AuditContext,
    ) -> Result<BallotView> {
        self.codec.verify(token)?;

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let link = tx
            .link_by_hash(&TokenCodec::hash_token(token))
            .await?
            .ok_or(Error::LinkNotFound)?;
        if member_id.map_or(false, |id| id != link.member_id) {
            return Err(Error::LinkInvalid);
        }
        let link = settle_expiry(tx.as_mut(), link, now).await?;
        if let Some(e) = link.status.terminal_error() {
            tx.commit().await?;
            return Err(e);
        }
        tx.record_link_access(link.id, now).await?;

        let election = tx
            .election(link.election_id)
            .await?
            .ok_or(Error::ElectionNotFound)?;
        let voted: HashSet<Id> = tx
            .voted_positions(link.member_id, election.id)
            .await?
            .into_iter()
            .collect();
        let mut positions = Vec::new();
        for position in tx.positions(election.id).await? {
            let candidates = tx.candidates(position.id).await?;
            let has_voted = voted.contains(&position.id);
            positions.push(BallotPosition::new(position, candidates, has_voted));
        }

        let actor = AuditContext {
            actor_id: Some(link.member_id),
            ..ctx.clone()
        };
        let log = VotingLog::new(AuditAction::LinkAccessed, &actor)
            .election(election.id, election.chapter.as_deref())
            .resource(link.id);
        tx.insert_log(&log).await?;
        tx.commit().await?;

        Ok(BallotView {
            election: election.into(),
            positions,
            member_id: link.member_id.into(),
        })
    }
}
