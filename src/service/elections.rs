use chrono::Utc;
use mongodb::bson::doc;

use crate::error::{Error, Result};
use crate::model::{
    api::election::{CandidateSpec, ElectionSpec, PositionSpec},
    audit::{AuditAction, AuditContext, VotingLog},
    election::{Candidate, Election, ElectionCore, ElectionStatus, Position},
    mongodb::Id,
};
use crate::store::{Reader, StatusChange, Transaction};

use super::Voting;

fn actor(ctx: &AuditContext) -> Result<Id> {
    ctx.actor_id
        .ok_or_else(|| Error::Unauthorized("No acting user".to_string()))
}

fn ballot_locked() -> Error {
    Error::Forbidden("The ballot cannot change once voting has started".to_string())
}

impl Voting {
    /// Create a pending election.
    pub async fn create_election(&self, spec: ElectionSpec, ctx: &AuditContext) -> Result<Election> {
        let created_by = actor(ctx)?;
        if spec.end_time <= spec.start_time {
            return Err(Error::InvalidElectionWindow);
        }
        if spec.title.trim().is_empty() {
            return Err(Error::BadRequest("Election title is empty".to_string()));
        }

        let election = Election::new(ElectionCore {
            title: spec.title,
            description: spec.description,
            chapter: spec.chapter,
            status: ElectionStatus::Pending,
            start_time: spec.start_time,
            end_time: spec.end_time,
            require_verification: spec.require_verification,
            allow_multiple_positions: spec.allow_multiple_positions,
            public_results: spec.public_results,
            total_eligible_voters: 0,
            total_votes_cast: 0,
            turnout_percentage: 0.0,
            created_by,
            approved_by: None,
            created_at: Utc::now(),
            closed_at: None,
        });

        let mut tx = self.store.begin().await?;
        tx.insert_election(&election).await?;
        let log = VotingLog::new(AuditAction::ElectionCreated, ctx)
            .election(election.id, election.chapter.as_deref())
            .resource(election.id)
            .details(doc! {"title": election.title.clone()});
        tx.insert_log(&log).await?;
        tx.commit().await?;

        info!("Election {} created", election.id);
        Ok(election)
    }

    pub async fn approve_election(&self, id: Id, ctx: &AuditContext) -> Result<Election> {
        self.transition(id, ElectionStatus::Approved, ctx).await
    }

    /// Open voting. The electorate size is fixed at this point.
    pub async fn start_election(&self, id: Id, ctx: &AuditContext) -> Result<Election> {
        self.transition(id, ElectionStatus::Active, ctx).await
    }

    pub async fn close_election(&self, id: Id, ctx: &AuditContext) -> Result<Election> {
        self.transition(id, ElectionStatus::Closed, ctx).await
    }

    pub async fn cancel_election(&self, id: Id, ctx: &AuditContext) -> Result<Election> {
        self.transition(id, ElectionStatus::Cancelled, ctx).await
    }

    async fn transition(&self, id: Id, next: ElectionStatus, ctx: &AuditContext) -> Result<Election> {
        let acting = actor(ctx)?;
        let mut tx = self.store.begin().await?;
        let election = tx.election(id).await?.ok_or(Error::ElectionNotFound)?;
        let from = election.status;
        if !from.can_transition_to(next) {
            return Err(Error::InvalidTransition { from, to: next });
        }

        let mut change = StatusChange::to(next);
        match next {
            ElectionStatus::Approved => change.approved_by = Some(acting),
            ElectionStatus::Active => {
                let electorate = tx
                    .members_in(election.chapter.as_deref())
                    .await?
                    .iter()
                    .filter(|m| {
                        m.ineligibility(election.chapter.as_deref(), election.require_verification)
                            .is_none()
                    })
                    .count();
                change.total_eligible_voters = Some(electorate as u64);
            }
            ElectionStatus::Closed | ElectionStatus::Cancelled => {
                change.closed_at = Some(Utc::now())
            }
            ElectionStatus::Pending => {}
        }

        if !tx.update_election_status(id, from, &change).await? {
            // Someone else moved it first.
            return Err(Error::InvalidTransition { from, to: next });
        }
        let log = VotingLog::new(AuditAction::ElectionStatusChanged, ctx)
            .election(id, election.chapter.as_deref())
            .resource(id)
            .details(doc! {"from": from, "to": next});
        tx.insert_log(&log).await?;
        let updated = tx.election(id).await?.ok_or(Error::ElectionNotFound)?;
        tx.commit().await?;

        info!("Election {id} moved from {from} to {next}");
        Ok(updated)
    }

    pub async fn add_position(
        &self,
        election_id: Id,
        spec: PositionSpec,
        ctx: &AuditContext,
    ) -> Result<Position> {
        let mut tx = self.store.begin().await?;
        let election = tx
            .election(election_id)
            .await?
            .ok_or(Error::ElectionNotFound)?;
        if !election.status.is_editable() {
            return Err(ballot_locked());
        }

        let position = Position::new(election_id, spec.name, spec.description, spec.order);
        tx.insert_position(&position).await?;
        let log = VotingLog::new(AuditAction::BallotChanged, ctx)
            .election(election_id, election.chapter.as_deref())
            .resource(position.id)
            .details(doc! {"added_position": position.name.clone()});
        tx.insert_log(&log).await?;
        tx.commit().await?;
        Ok(position)
    }

    pub async fn add_candidate(
        &self,
        position_id: Id,
        spec: CandidateSpec,
        ctx: &AuditContext,
    ) -> Result<Candidate> {
        let mut tx = self.store.begin().await?;
        let position = tx
            .position(position_id)
            .await?
            .ok_or(Error::PositionNotFound)?;
        let election = tx
            .election(position.election_id)
            .await?
            .ok_or(Error::ElectionNotFound)?;
        if !election.status.is_editable() {
            return Err(ballot_locked());
        }

        let candidate = Candidate::new(
            position_id,
            election.id,
            spec.name,
            spec.bio,
            spec.photo_url,
            spec.order,
        );
        tx.insert_candidate(&candidate).await?;
        let log = VotingLog::new(AuditAction::BallotChanged, ctx)
            .election(election.id, election.chapter.as_deref())
            .resource(candidate.id)
            .details(doc! {"added_candidate": candidate.name.clone(), "position_id": position_id});
        tx.insert_log(&log).await?;
        tx.commit().await?;
        Ok(candidate)
    }

    /// Withdraw a candidate. Votes already cast for them stay on the ledger.
    pub async fn withdraw_candidate(&self, candidate_id: Id, ctx: &AuditContext) -> Result<Candidate> {
        let mut tx = self.store.begin().await?;
        let candidate = tx
            .candidate(candidate_id)
            .await?
            .ok_or(Error::CandidateNotFound)?;
        let election = tx
            .election(candidate.election_id)
            .await?
            .ok_or(Error::ElectionNotFound)?;
        if election.status.is_terminal() {
            return Err(Error::ElectionNotActive);
        }

        tx.withdraw_candidate(candidate_id).await?;
        let log = VotingLog::new(AuditAction::BallotChanged, ctx)
            .election(election.id, election.chapter.as_deref())
            .resource(candidate_id)
            .details(doc! {"withdrawn_candidate": candidate.name.clone()});
        tx.insert_log(&log).await?;
        tx.commit().await?;

        Ok(Candidate {
            is_withdrawn: true,
            ..candidate
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{audit::AuditContext, member::Member};
    use crate::service::fixtures::Fixture;

    #[rocket::async_test]
    async fn full_lifecycle() {
        let fixture = Fixture::new().await;
        let voting = &fixture.voting;
        let ctx = &fixture.organiser;

        let election = voting
            .create_election(ElectionSpec::example(), ctx)
            .await
            .unwrap();
        assert_eq!(election.status, ElectionStatus::Pending);
        assert_eq!(Some(election.created_by), ctx.actor_id);

        let chair = voting
            .add_position(election.id, PositionSpec::example("Chair", 1), ctx)
            .await
            .unwrap();
        voting
            .add_candidate(chair.id, CandidateSpec::example("Ada", 1), ctx)
            .await
            .unwrap();

        let approved = voting.approve_election(election.id, ctx).await.unwrap();
        assert_eq!(approved.status, ElectionStatus::Approved);
        assert_eq!(approved.approved_by, ctx.actor_id);

        // Three verified, active members in the north chapter.
        let started = voting.start_election(election.id, ctx).await.unwrap();
        assert_eq!(started.status, ElectionStatus::Active);
        assert_eq!(started.total_eligible_voters, 3);

        assert!(matches!(
            voting
                .add_position(election.id, PositionSpec::example("Late", 2), ctx)
                .await,
            Err(Error::Forbidden(_))
        ));

        let closed = voting.close_election(election.id, ctx).await.unwrap();
        assert_eq!(closed.status, ElectionStatus::Closed);
        assert!(closed.closed_at.is_some());

        assert!(matches!(
            voting.start_election(election.id, ctx).await,
            Err(Error::InvalidTransition {
                from: ElectionStatus::Closed,
                to: ElectionStatus::Active
            })
        ));
    }

    #[rocket::async_test]
    async fn creation_is_validated() {
        let fixture = Fixture::new().await;
        let mut spec = ElectionSpec::example();
        spec.end_time = spec.start_time;
        assert!(matches!(
            fixture.voting.create_election(spec, &fixture.organiser).await,
            Err(Error::InvalidElectionWindow)
        ));

        assert!(matches!(
            fixture
                .voting
                .create_election(ElectionSpec::example(), &AuditContext::default())
                .await,
            Err(Error::Unauthorized(_))
        ));
    }

    #[rocket::async_test]
    async fn electorate_counts_only_eligible_members() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .seed_member(Member {
                is_active: false,
                ..Member::example("Rae")
            })
            .await;
        let ctx = &fixture.organiser;
        let mut spec = ElectionSpec::example();
        spec.require_verification = false;
        let election = fixture.voting.create_election(spec, ctx).await.unwrap();
        fixture.voting.approve_election(election.id, ctx).await.unwrap();
        let started = fixture.voting.start_election(election.id, ctx).await.unwrap();
        // Three verified plus the unverified member; not the inactive one or the outsider.
        assert_eq!(started.total_eligible_voters, 4);
    }

    #[rocket::async_test]
    async fn cancelled_elections_stay_cancelled() {
        let fixture = Fixture::new().await;
        let ctx = &fixture.organiser;
        let cancelled = fixture
            .voting
            .cancel_election(fixture.election.id, ctx)
            .await
            .unwrap();
        assert_eq!(cancelled.status, ElectionStatus::Cancelled);
        assert!(matches!(
            fixture.voting.close_election(fixture.election.id, ctx).await,
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            fixture
                .voting
                .withdraw_candidate(fixture.candidates[0][0].id, ctx)
                .await,
            Err(Error::ElectionNotActive)
        ));
    }
}
