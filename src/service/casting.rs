use chrono::Utc;
use mongodb::bson::doc;

use crate::error::{Error, Result};
use crate::model::{
    audit::{AuditAction, AuditContext, VotingLog},
    election::ElectionStatus,
    link::{LinkStatus, TokenCodec, VotingLink},
    member::Ineligibility,
    mongodb::Id,
    vote::{Vote, VoteStatus},
};
use crate::store::{Reader, Transaction};

use super::Voting;

/// A request to cast one vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastVote {
    pub member_id: Id,
    pub candidate_id: Id,
    pub position_id: Id,
    pub election_id: Id,
    /// Voting link token, if the vote comes through a link.
    pub token: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl CastVote {
    fn context(&self) -> AuditContext {
        AuditContext {
            actor_id: Some(self.member_id),
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

impl Voting {
    /// Record a vote and update the tallies, all or nothing.
    ///
    /// A member can hold at most one vote per position. If two requests race,
    /// the ledger's unique key rejects the loser with [`Error::DuplicateVote`],
    /// exactly as the up-front check would have.
    pub async fn cast_vote(&self, request: CastVote) -> Result<Vote> {
        let mut tx = self.store.begin().await?;
        let result = match self.record_vote(tx.as_mut(), &request).await {
            Ok(vote) => tx.commit().await.map(|_| vote),
            Err(e) => {
                if let Err(abort) = tx.abort().await {
                    warn!("Failed to abort vote transaction: {abort}");
                }
                Err(e)
            }
        };

        match result {
            Ok(vote) => {
                info!(
                    "Vote {} cast in election {} for position {}",
                    vote.id, vote.election_id, vote.position_id
                );
                self.after_vote(&vote).await;
                Ok(vote)
            }
            Err(e) => {
                debug!("Vote by member {} rejected: {e}", request.member_id);
                self.record_failed_vote(&request, &e).await;
                Err(e)
            }
        }
    }

    /// Every check and write of a vote, inside one transaction.
    async fn record_vote(&self, tx: &mut dyn Transaction, request: &CastVote) -> Result<Vote> {
        let now = Utc::now();

        // The election must be open.
        let election = tx
            .election(request.election_id)
            .await?
            .ok_or(Error::ElectionNotFound)?;
        if election.status != ElectionStatus::Active {
            return Err(Error::ElectionNotActive);
        }
        if !election.window_contains(now) {
            return Err(Error::ElectionWindowClosed);
        }

        // The member must be eligible.
        let member = tx
            .member(request.member_id)
            .await?
            .ok_or(Error::MemberNotFound)?;
        match member.ineligibility(election.chapter.as_deref(), election.require_verification) {
            None => {}
            Some(Ineligibility::Inactive) => return Err(Error::MemberInactive),
            Some(Ineligibility::Unverified) => return Err(Error::MemberNotVerified),
            Some(Ineligibility::OtherChapter | Ineligibility::Unknown) => {
                return Err(Error::Forbidden(
                    "Member does not belong to this election's chapter".to_string(),
                ))
            }
        }

        // Fast path; the unique key on insert is the real guard.
        if tx
            .find_vote(member.id, request.position_id, election.id)
            .await?
            .is_some()
        {
            return Err(Error::DuplicateVote);
        }

        // The candidate must be standing for this position.
        let candidate = tx
            .candidate(request.candidate_id)
            .await?
            .ok_or(Error::CandidateNotFound)?;
        if !candidate.is_eligible() {
            return Err(Error::CandidateIneligible);
        }
        if candidate.position_id != request.position_id || candidate.election_id != election.id {
            return Err(Error::CandidateMismatch);
        }

        // The link, if any, must be live.
        let link = match &request.token {
            Some(token) => Some(self.usable_link(tx, token, request).await?),
            None => match tx.live_link(member.id, election.id).await? {
                Some(link) if !link.is_lapsed(now) => Some(link),
                _ => None,
            },
        };
        let via_link = request.token.is_some();

        let vote = Vote {
            id: Id::new(),
            member_id: member.id,
            member_email: member.email.clone(),
            member_name: member.full_name(),
            candidate_id: candidate.id,
            position_id: candidate.position_id,
            election_id: election.id,
            chapter: election.chapter.clone(),
            link_token: request.token.clone(),
            link_token_hash: request.token.as_deref().map(TokenCodec::hash_token),
            timestamp: now,
            ip_address: request.ip_address.clone(),
            user_agent: request.user_agent.clone(),
            verified: via_link,
            status: VoteStatus::Cast,
            annotation: None,
        };
        tx.insert_vote(&vote).await?;
        tx.increment_tallies(candidate.id, candidate.position_id, election.id)
            .await?;

        // The link is spent once every position has a vote.
        if let Some(link) = link {
            let voted = tx.voted_positions(member.id, election.id).await?;
            let positions = tx.positions(election.id).await?;
            if positions.iter().all(|p| voted.contains(&p.id)) {
                tx.transition_link(link.id, link.status, LinkStatus::Used, now)
                    .await?;
                debug!("Voting link {} used up", link.id);
            }
        }

        let log = VotingLog::new(AuditAction::VoteCast, &request.context())
            .election(election.id, election.chapter.as_deref())
            .resource(vote.id)
            .details(doc! {
                "position_id": vote.position_id,
                "candidate_id": vote.candidate_id,
                "verified": vote.verified,
            });
        tx.insert_log(&log).await?;

        Ok(vote)
    }

    /// Resolve the link behind `token` and make sure it can authorise this vote.
    async fn usable_link(
        &self,
        tx: &mut dyn Transaction,
        token: &str,
        request: &CastVote,
    ) -> Result<VotingLink> {
        let payload = self.codec.verify(token)?;
        if payload.member_id != request.member_id || payload.election_id != request.election_id {
            return Err(Error::LinkInvalid);
        }
        let link = tx
            .link_by_hash(&TokenCodec::hash_token(token))
            .await?
            .filter(|l| l.member_id == request.member_id && l.election_id == request.election_id)
            .ok_or(Error::LinkInvalid)?;
        if let Some(e) = link.status.terminal_error() {
            return Err(e);
        }
        if link.is_lapsed(Utc::now()) {
            return Err(Error::LinkExpired);
        }
        Ok(link)
    }

    /// Refresh display values and tell live viewers. Failures are only logged.
    async fn after_vote(&self, vote: &Vote) {
        if let Err(e) = self
            .refresh_display_stats(vote.election_id, &[vote.position_id])
            .await
        {
            warn!("Could not refresh stats for election {}: {e}", vote.election_id);
        }
        self.broadcaster
            .emit_vote_update(vote.election_id, vote.position_id, vote.candidate_id);
    }

    /// Audit a rejected vote in its own transaction.
    async fn record_failed_vote(&self, request: &CastVote, error: &Error) {
        let result = async {
            let mut tx = self.store.begin().await?;
            let election = tx.election(request.election_id).await?;
            let mut log = VotingLog::new(AuditAction::VoteFailed, &request.context())
                .details(doc! {
                    "position_id": request.position_id,
                    "candidate_id": request.candidate_id,
                    "error": error.kind(),
                })
                .failed();
            if let Some(election) = election {
                log = log.election(election.id, election.chapter.as_deref());
            }
            tx.insert_log(&log).await?;
            tx.commit().await
        }
        .await;
        if let Err(e) = result {
            warn!("Could not audit failed vote: {e}");
        }
    }
}
