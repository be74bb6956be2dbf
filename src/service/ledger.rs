//! The administrative exception paths over the vote ledger.

use chrono::Utc;
use mongodb::bson::doc;

use crate::error::{Error, Result};
use crate::model::{
    api::vote::{CounterScope, Discrepancy, ReconciliationReport},
    audit::{AuditAction, AuditContext, VotingLog},
    mongodb::Id,
    vote::{Annotation, AnnotationKind, Vote},
};
use crate::store::{Reader, Transaction};

use super::Voting;

impl Voting {
    /// Dispute or invalidate a vote. Only the status and annotation change;
    /// the cast fields and the tallies are left alone.
    pub async fn annotate_vote(
        &self,
        vote_id: Id,
        kind: AnnotationKind,
        reason: String,
        ctx: &AuditContext,
    ) -> Result<Vote> {
        let by = ctx
            .actor_id
            .ok_or_else(|| Error::Unauthorized("Annotating a vote needs an actor".to_string()))?;
        if reason.trim().is_empty() {
            return Err(Error::BadRequest("A reason is required".to_string()));
        }

        let mut tx = self.store.begin().await?;
        let vote = tx.vote(vote_id).await?.ok_or(Error::VoteNotFound)?;
        if !vote.status.can_annotate(kind) {
            return Err(Error::VoteAlreadyAnnotated);
        }
        let annotation = Annotation {
            by,
            at: Utc::now(),
            reason,
        };
        let status = kind.status();
        if !tx
            .annotate_vote(vote_id, vote.status, status, &annotation)
            .await?
        {
            return Err(Error::VoteAlreadyAnnotated);
        }

        let action = match kind {
            AnnotationKind::Disputed => AuditAction::VoteDisputed,
            AnnotationKind::Invalidated => AuditAction::VoteInvalidated,
        };
        let log = VotingLog::new(action, ctx)
            .election(vote.election_id, vote.chapter.as_deref())
            .resource(vote_id)
            .details(doc! {
                "previous_status": vote.status,
                "reason": annotation.reason.clone(),
            });
        tx.insert_log(&log).await?;
        tx.commit().await?;

        warn!("Vote {vote_id} marked {status:?} by {by}");
        Ok(Vote {
            status,
            annotation: Some(annotation),
            ..vote
        })
    }

    /// Recount an election's ledger and compare it with the tally counters.
    ///
    /// Only votes still in the `cast` state count. With `apply`, counters that
    /// disagree are overwritten with the ledger count; this is the only path
    /// that ever sets a counter rather than incrementing it.
    pub async fn reconcile_tally(
        &self,
        election_id: Id,
        apply: bool,
        ctx: &AuditContext,
    ) -> Result<ReconciliationReport> {
        let mut tx = self.store.begin().await?;
        let election = tx
            .election(election_id)
            .await?
            .ok_or(Error::ElectionNotFound)?;
        let counts = tx.cast_counts(election_id).await?;

        let mut discrepancies = Vec::new();
        let mut counted_votes = 0;
        let positions = tx.positions(election_id).await?;
        for position in &positions {
            let mut position_votes = 0;
            for candidate in tx.candidates(position.id).await? {
                let ledger = counts.get(&candidate.id).copied().unwrap_or(0);
                position_votes += ledger;
                if ledger != candidate.votes_count {
                    discrepancies.push(Discrepancy {
                        scope: CounterScope::Candidate,
                        id: candidate.id.into(),
                        counter: candidate.votes_count,
                        ledger,
                    });
                }
            }
            counted_votes += position_votes;
            if position_votes != position.total_votes {
                discrepancies.push(Discrepancy {
                    scope: CounterScope::Position,
                    id: position.id.into(),
                    counter: position.total_votes,
                    ledger: position_votes,
                });
            }
        }
        if counted_votes != election.total_votes_cast {
            discrepancies.push(Discrepancy {
                scope: CounterScope::Election,
                id: election_id.into(),
                counter: election.total_votes_cast,
                ledger: counted_votes,
            });
        }

        let report = ReconciliationReport {
            election_id: election_id.into(),
            counted_votes,
            discrepancies,
            applied: apply,
        };
        if !apply {
            tx.abort().await?;
            return Ok(report);
        }

        for discrepancy in &report.discrepancies {
            let id = discrepancy.id.into();
            match discrepancy.scope {
                CounterScope::Candidate => tx.set_candidate_votes(id, discrepancy.ledger).await?,
                CounterScope::Position => tx.set_position_votes(id, discrepancy.ledger).await?,
                CounterScope::Election => tx.set_election_votes(id, discrepancy.ledger).await?,
            }
        }
        let log = VotingLog::new(AuditAction::TallyReconciled, ctx)
            .election(election_id, election.chapter.as_deref())
            .details(doc! {
                "counted_votes": counted_votes as i64,
                "corrections": report.discrepancies.len() as i64,
            });
        tx.insert_log(&log).await?;
        tx.commit().await?;

        if !report.is_consistent() {
            warn!(
                "Corrected {} tally counters for election {election_id}",
                report.discrepancies.len()
            );
        }
        let position_ids: Vec<_> = positions.iter().map(|p| p.id).collect();
        if let Err(e) = self.refresh_display_stats(election_id, &position_ids).await {
            warn!("Could not refresh stats for election {election_id}: {e}");
        }
        Ok(report)
    }
}
