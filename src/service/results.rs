use std::cmp::Reverse;

use crate::error::{Error, Result};
use crate::model::{
    api::{
        election::{CandidateDescription, ElectionDescription},
        results::{ElectionResults, PositionResults},
    },
    audit::{AuditAction, AuditContext, VotingLog},
    election::{percentage, Election, ElectionStatus},
    mongodb::Id,
};
use crate::store::{Reader, Transaction};

use super::Voting;

impl Voting {
    /// Current results of an election, read from the tally counters at a
    /// single point in time. Passing a context records the view in the audit log.
    pub async fn election_results(
        &self,
        election_id: Id,
        ctx: Option<&AuditContext>,
    ) -> Result<ElectionResults> {
        let (_, results) = self.tally(election_id).await?;
        if let Some(ctx) = ctx {
            let election = &results.election;
            let log = VotingLog::new(AuditAction::ResultsViewed, ctx)
                .election(election_id, election.chapter.as_deref());
            let mut tx = self.store.begin().await?;
            tx.insert_log(&log).await?;
            tx.commit().await?;
        }
        Ok(results)
    }

    /// Results for anyone: only for elections that publish them live or have
    /// closed.
    pub async fn public_results(&self, election_id: Id) -> Result<ElectionResults> {
        let (election, results) = self.tally(election_id).await?;
        if !election.public_results && election.status != ElectionStatus::Closed {
            return Err(Error::Forbidden(
                "Results are not public until the election closes".to_string(),
            ));
        }
        Ok(results)
    }

    async fn tally(&self, election_id: Id) -> Result<(Election, ElectionResults)> {
        let mut reader = self.store.snapshot().await?;
        let mut election = reader
            .election(election_id)
            .await?
            .ok_or(Error::ElectionNotFound)?;

        let positions = reader.positions(election_id).await?;
        let mut tallies = Vec::with_capacity(positions.len());
        for position in positions {
            let mut candidates = reader.candidates(position.id).await?;
            candidates.sort_by_key(|c| (Reverse(c.votes_count), c.order));
            let candidates = candidates
                .into_iter()
                .map(|mut candidate| {
                    candidate.vote_percentage =
                        percentage(candidate.votes_count, position.total_votes);
                    CandidateDescription::from(candidate)
                })
                .collect();
            tallies.push(PositionResults {
                position: position.into(),
                candidates,
            });
        }

        election.turnout_percentage = election.turnout(tallies.len());
        let results = ElectionResults {
            election: ElectionDescription::from(election.clone()),
            positions: tallies,
        };
        Ok((election, results))
    }

    /// Recompute the display percentages of the given positions' candidates
    /// and the election turnout from the counters.
    pub(super) async fn refresh_display_stats(
        &self,
        election_id: Id,
        position_ids: &[Id],
    ) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let election = match tx.election(election_id).await? {
            Some(election) => election,
            None => return Ok(()),
        };
        for &position_id in position_ids {
            let position = match tx.position(position_id).await? {
                Some(position) => position,
                None => continue,
            };
            for candidate in tx.candidates(position_id).await? {
                let share = percentage(candidate.votes_count, position.total_votes);
                if share != candidate.vote_percentage {
                    tx.set_vote_percentage(candidate.id, share).await?;
                }
            }
        }
        let position_count = tx.positions(election_id).await?.len();
        tx.set_turnout(election_id, election.turnout(position_count))
            .await?;
        tx.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::election::ElectionCore;
    use crate::service::fixtures::Fixture;
    use crate::store::Store;

    #[rocket::async_test]
    async fn ranks_candidates_with_rounded_shares() {
        let fixture = Fixture::new().await;
        let position = &fixture.positions[0];
        let extra = crate::model::election::Candidate::new(
            position.id,
            fixture.election.id,
            "Cy".to_string(),
            String::new(),
            None,
            2,
        );

        // Counts [3, 2, 5] in display order, 10 in total.
        let mut tx = fixture.store.begin().await.unwrap();
        tx.insert_candidate(&extra).await.unwrap();
        tx.set_candidate_votes(fixture.candidates[0][0].id, 3).await.unwrap();
        tx.set_candidate_votes(fixture.candidates[0][1].id, 2).await.unwrap();
        tx.set_candidate_votes(extra.id, 5).await.unwrap();
        tx.set_position_votes(position.id, 10).await.unwrap();
        tx.set_election_votes(fixture.election.id, 10).await.unwrap();
        tx.commit().await.unwrap();

        let results = fixture
            .voting
            .election_results(fixture.election.id, None)
            .await
            .unwrap();
        let chair = &results.positions[0];
        assert_eq!(chair.position.total_votes, 10);
        let ranked: Vec<_> = chair
            .candidates
            .iter()
            .map(|c| (c.votes_count, c.vote_percentage))
            .collect();
        assert_eq!(ranked, vec![(5, 50.0), (3, 30.0), (2, 20.0)]);

        // No votes yet: zero, not NaN.
        let treasurer = &results.positions[1];
        assert!(treasurer.candidates.iter().all(|c| c.vote_percentage == 0.0));

        assert_eq!(results.election.total_votes_cast, 10);
        // 10 of 3 members times 2 positions, capped.
        assert_eq!(results.election.turnout_percentage, 100.0);
    }

    #[rocket::async_test]
    async fn ties_keep_display_order() {
        let fixture = Fixture::new().await;
        let position = &fixture.positions[0];
        let mut tx = fixture.store.begin().await.unwrap();
        for candidate in &fixture.candidates[0] {
            tx.set_candidate_votes(candidate.id, 1).await.unwrap();
        }
        tx.set_position_votes(position.id, 2).await.unwrap();
        tx.commit().await.unwrap();

        let results = fixture
            .voting
            .election_results(fixture.election.id, None)
            .await
            .unwrap();
        let orders: Vec<_> = results.positions[0]
            .candidates
            .iter()
            .map(|c| c.order)
            .collect();
        assert_eq!(orders, vec![0, 1]);
    }

    #[rocket::async_test]
    async fn audited_reads_are_logged() {
        let fixture = Fixture::new().await;
        fixture
            .voting
            .election_results(fixture.election.id, Some(&fixture.organiser))
            .await
            .unwrap();
        fixture
            .voting
            .election_results(fixture.election.id, None)
            .await
            .unwrap();

        let (total, logs) = fixture
            .store
            .snapshot()
            .await
            .unwrap()
            .audit_log(fixture.election.id, 0, 10)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(logs[0].action, AuditAction::ResultsViewed);
        assert_eq!(logs[0].actor_id, fixture.organiser.actor_id);
    }

    #[rocket::async_test]
    async fn private_results_wait_for_close() {
        let fixture = Fixture::with_election(ElectionCore {
            public_results: false,
            ..ElectionCore::example()
        })
        .await;
        assert!(matches!(
            fixture.voting.public_results(fixture.election.id).await,
            Err(Error::Forbidden(_))
        ));
        // Organisers can always look.
        fixture
            .voting
            .election_results(fixture.election.id, None)
            .await
            .unwrap();

        fixture
            .voting
            .close_election(fixture.election.id, &fixture.organiser)
            .await
            .unwrap();
        fixture
            .voting
            .public_results(fixture.election.id)
            .await
            .unwrap();

        assert!(matches!(
            fixture.voting.public_results(Id::new()).await,
            Err(Error::ElectionNotFound)
        ));
    }
}
