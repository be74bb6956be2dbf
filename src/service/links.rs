use chrono::{DateTime, Utc};
use mongodb::bson::doc;

use crate::error::{Error, Result};
use crate::model::{
    api::links::{GeneratedLinks, IssuedLink, SkippedMember},
    audit::{AuditAction, AuditContext, VotingLog},
    election::{Election, ElectionStatus},
    link::{LinkStatus, TokenPayload, VotingLink},
    member::{Ineligibility, Member},
    mongodb::Id,
};
use crate::notify::VotingLinkEmail;
use crate::store::{Reader, Transaction};

use super::Voting;

/// Rewrite a live link whose expiry has passed to `expired`, returning the
/// link as it now stands.
pub(super) async fn settle_expiry(
    tx: &mut dyn Transaction,
    mut link: VotingLink,
    now: DateTime<Utc>,
) -> Result<VotingLink> {
    if link.is_lapsed(now) && tx
        .transition_link(link.id, link.status, LinkStatus::Expired, now)
        .await?
    {
        debug!("Voting link {} expired", link.id);
        link.status = LinkStatus::Expired;
        link.active_slot = None;
    }
    Ok(link)
}

fn issuance_log(
    election: &Election,
    member: &Member,
    link: &VotingLink,
    already_exists: bool,
    ctx: &AuditContext,
) -> VotingLog {
    VotingLog::new(AuditAction::LinkGenerated, ctx)
        .election(election.id, election.chapter.as_deref())
        .resource(link.id)
        .details(doc! {
            "member_id": member.id,
            "already_exists": already_exists,
        })
}

impl Voting {
    /// Issue voting links for an election, to the given members or to every
    /// member in the election's chapter.
    ///
    /// Members who already hold a live link get that link back. Ineligible
    /// members are skipped and reported. Emailing is best effort.
    pub async fn generate_voting_links(
        &self,
        election_id: Id,
        member_ids: Option<Vec<Id>>,
        ctx: &AuditContext,
    ) -> Result<GeneratedLinks> {
        let actor = ctx
            .actor_id
            .ok_or_else(|| Error::Unauthorized("Issuing links needs an actor".to_string()))?;

        let (election, members, skipped) = {
            let mut reader = self.store.snapshot().await?;
            let election = reader
                .election(election_id)
                .await?
                .ok_or(Error::ElectionNotFound)?;
            if matches!(
                election.status,
                ElectionStatus::Closed | ElectionStatus::Cancelled
            ) {
                return Err(Error::ElectionNotActive);
            }
            if election.end_time < Utc::now() {
                return Err(Error::ElectionWindowClosed);
            }

            let mut skipped = Vec::new();
            let members = match member_ids {
                Some(ids) => {
                    let mut members = Vec::with_capacity(ids.len());
                    for id in ids {
                        match reader.member(id).await? {
                            Some(member) => members.push(member),
                            None => skipped.push(SkippedMember {
                                member_id: id.into(),
                                reason: Ineligibility::Unknown,
                            }),
                        }
                    }
                    members
                }
                None => reader.members_in(election.chapter.as_deref()).await?,
            };
            (election, members, skipped)
        };

        let mut generated = GeneratedLinks {
            skipped,
            ..Default::default()
        };
        for member in members {
            if let Some(reason) =
                member.ineligibility(election.chapter.as_deref(), election.require_verification)
            {
                generated.skipped.push(SkippedMember {
                    member_id: member.id.into(),
                    reason,
                });
                continue;
            }
            // Email as we go so a later failure cannot strand committed links.
            let (mut link, already_exists) =
                self.issue_link(&election, &member, actor, ctx).await?;
            if !link.email_sent {
                self.email_link(&election, &member, &mut link, ctx).await;
            }
            generated.push(IssuedLink::new(&link, already_exists));
        }
        info!(
            "Issued {} voting links for election {} ({} new, {} skipped)",
            generated.total,
            election.id,
            generated.new_links,
            generated.skipped.len()
        );
        Ok(generated)
    }

    /// Reuse the member's live link or mint a new one.
    ///
    /// If another issuer wins the member's link slot between our read and our
    /// insert, the link they committed is returned as already existing.
    async fn issue_link(
        &self,
        election: &Election,
        member: &Member,
        actor: Id,
        ctx: &AuditContext,
    ) -> Result<(VotingLink, bool)> {
        match self.mint_link(election, member, actor, ctx).await {
            Err(e) if matches!(e, Error::Constraint(_)) || e.is_transient() => {
                debug!(
                    "Lost link slot race for member {} in election {}: {e}",
                    member.id, election.id
                );
                let mut tx = self.store.begin().await?;
                let Some(link) = tx.live_link(member.id, election.id).await? else {
                    return Err(e);
                };
                tx.insert_log(&issuance_log(election, member, &link, true, ctx))
                    .await?;
                tx.commit().await?;
                Ok((link, true))
            }
            other => other,
        }
    }

    /// One attempt at issuing a link, in one transaction.
    async fn mint_link(
        &self,
        election: &Election,
        member: &Member,
        actor: Id,
        ctx: &AuditContext,
    ) -> Result<(VotingLink, bool)> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let existing = match tx.live_link(member.id, election.id).await? {
            Some(link) => Some(settle_expiry(tx.as_mut(), link, now).await?),
            None => None,
        };
        let (link, already_exists) = match existing {
            Some(link) if !link.status.is_terminal() => (link, true),
            _ => {
                let generated = self.codec.generate(&TokenPayload {
                    member_id: member.id,
                    election_id: election.id,
                    issued_at: now,
                });
                let link = VotingLink {
                    id: Id::new(),
                    member_id: member.id,
                    member_email: member.email.clone(),
                    election_id: election.id,
                    chapter: election.chapter.clone(),
                    token: generated.token,
                    token_hash: generated.token_hash,
                    expires_at: election.end_time,
                    status: LinkStatus::Pending,
                    email_sent: false,
                    email_sent_at: None,
                    accessed_at: None,
                    access_count: 0,
                    generated_by: actor,
                    created_at: now,
                    used_at: None,
                    active_slot: Some(VotingLink::slot_key(member.id, election.id)),
                };
                tx.insert_link(&link).await?;
                (link, false)
            }
        };

        tx.insert_log(&issuance_log(election, member, &link, already_exists, ctx))
            .await?;
        tx.commit().await?;
        Ok((link, already_exists))
    }

    /// Send a link by email and record the delivery. Never fails.
    async fn email_link(
        &self,
        election: &Election,
        member: &Member,
        link: &mut VotingLink,
        ctx: &AuditContext,
    ) {
        let email = VotingLinkEmail {
            to: member.email.clone(),
            name: member.full_name(),
            election_title: election.title.clone(),
            vote_url: self.vote_url(&link.token),
            expires_at: link.expires_at,
        };
        if !self.mailer.send_voting_link(&email).await {
            return;
        }

        let now = Utc::now();
        let result = async {
            let mut tx = self.store.begin().await?;
            tx.record_link_email(link.id, now).await?;
            let log = VotingLog::new(AuditAction::LinkEmailed, ctx)
                .election(election.id, election.chapter.as_deref())
                .resource(link.id);
            tx.insert_log(&log).await?;
            tx.commit().await
        }
        .await;
        match result {
            Ok(()) => {
                link.email_sent = true;
                link.email_sent_at = Some(now);
                if link.status == LinkStatus::Pending {
                    link.status = LinkStatus::Sent;
                }
            }
            Err(e) => warn!("Emailed link {} but could not record it: {e}", link.id),
        }
    }

    /// Withdraw a live link so that it can no longer authorise votes.
    pub async fn revoke_voting_link(&self, link_id: Id, ctx: &AuditContext) -> Result<VotingLink> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let link = tx.link(link_id).await?.ok_or(Error::LinkNotFound)?;
        let link = settle_expiry(tx.as_mut(), link, now).await?;
        if let Some(e) = link.status.terminal_error() {
            // Keep any expiry we just noticed.
            tx.commit().await?;
            return Err(e);
        }

        if !tx
            .transition_link(link.id, link.status, LinkStatus::Revoked, now)
            .await?
        {
            return Err(Error::LinkInvalid);
        }
        let log = VotingLog::new(AuditAction::LinkRevoked, ctx)
            .election(link.election_id, link.chapter.as_deref())
            .resource(link.id)
            .details(doc! {"member_id": link.member_id});
        tx.insert_log(&log).await?;
        tx.commit().await?;

        info!("Voting link {} revoked", link.id);
        Ok(VotingLink {
            status: LinkStatus::Revoked,
            active_slot: None,
            ..link
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::model::{election::ElectionCore, link::TokenCodec};
    use crate::service::fixtures::{Fixture, RecordingMailer};
    use crate::store::{StaleReads, Store};

    #[rocket::async_test]
    async fn chapter_members_get_links_and_others_are_skipped() {
        let fixture = Fixture::new().await;
        let generated = fixture
            .voting
            .generate_voting_links(fixture.election.id, None, &fixture.organiser)
            .await
            .unwrap();

        assert_eq!(generated.total, 3);
        assert_eq!(generated.new_links, 3);
        assert_eq!(generated.existing_links, 0);
        // The outsider is in another chapter, so only the unverified member is
        // considered and skipped.
        assert_eq!(
            generated.skipped,
            vec![SkippedMember {
                member_id: fixture.unverified.id.into(),
                reason: Ineligibility::Unverified,
            }]
        );
        assert!(generated.links.iter().all(|l| l.link.email_sent));
        assert_eq!(fixture.mailer.sent.lock().unwrap().len(), 3);

        let sent = fixture.mailer.sent.lock().unwrap()[0].clone();
        assert!(sent.vote_url.starts_with("https://vote.example.org/vote?token="));
        assert_eq!(sent.expires_at, fixture.election.end_time);
    }

    #[rocket::async_test]
    async fn issuance_is_idempotent() {
        let fixture = Fixture::new().await;
        let member = fixture.members[0].id;
        let first = fixture
            .voting
            .generate_voting_links(fixture.election.id, Some(vec![member]), &fixture.organiser)
            .await
            .unwrap();
        let second = fixture
            .voting
            .generate_voting_links(fixture.election.id, Some(vec![member]), &fixture.organiser)
            .await
            .unwrap();

        assert!(!first.links[0].already_exists);
        assert!(second.links[0].already_exists);
        assert_eq!(second.existing_links, 1);
        assert_eq!(first.links[0].link.id, second.links[0].link.id);
        assert_eq!(first.links[0].link.token, second.links[0].link.token);
        // Already emailed, so not sent again.
        assert_eq!(fixture.mailer.sent.lock().unwrap().len(), 1);

        let mut view = fixture.store.snapshot().await.unwrap();
        let (_, logs) = view.audit_log(fixture.election.id, 0, 100).await.unwrap();
        let issued = logs
            .iter()
            .filter(|l| l.action == AuditAction::LinkGenerated)
            .count();
        assert_eq!(issued, 2);
    }

    #[rocket::async_test]
    async fn losing_the_link_slot_reuses_the_winner() {
        let fixture = Fixture::new().await;
        let (first, second) = (&fixture.members[0], &fixture.members[1]);
        let earlier = fixture
            .voting
            .generate_voting_links(fixture.election.id, Some(vec![first.id]), &fixture.organiser)
            .await
            .unwrap();
        let earlier = &earlier.links[0].link;

        // The first lookup misses the committed link, as a racing issuer would.
        let store = StaleReads::new(fixture.store.clone());
        store.miss_live_links(1);
        let voting = fixture.voting_over(Arc::new(store));
        let generated = voting
            .generate_voting_links(
                fixture.election.id,
                Some(vec![first.id, second.id]),
                &fixture.organiser,
            )
            .await
            .unwrap();

        assert_eq!(generated.total, 2);
        assert_eq!(generated.existing_links, 1);
        assert!(generated.links[0].already_exists);
        assert_eq!(generated.links[0].link.id, earlier.id);
        assert!(!generated.links[1].already_exists);
        assert_eq!(generated.links[1].member_id, second.id.into());
        assert!(generated.links.iter().all(|l| l.link.email_sent));
        assert_eq!(fixture.mailer.sent.lock().unwrap().len(), 2);

        let mut view = fixture.store.snapshot().await.unwrap();
        let (_, logs) = view.audit_log(fixture.election.id, 0, 100).await.unwrap();
        let reused = logs
            .iter()
            .filter(|l| l.action == AuditAction::LinkGenerated)
            .filter(|l| matches!(l.details.get_bool("already_exists"), Ok(true)))
            .count();
        assert_eq!(reused, 1);
    }

    #[rocket::async_test]
    async fn earlier_links_are_emailed_before_a_failure() {
        let fixture = Fixture::new().await;
        let (first, second) = (&fixture.members[0], &fixture.members[1]);

        // Plant a used link holding the second member's slot, so their
        // issuance conflicts and no live link can be found to reuse.
        let planted = fixture.voting.codec.generate(&TokenPayload {
            member_id: second.id,
            election_id: fixture.election.id,
            issued_at: Utc::now(),
        });
        let blocking = VotingLink {
            id: Id::new(),
            member_id: second.id,
            member_email: second.email.clone(),
            election_id: fixture.election.id,
            chapter: fixture.election.chapter.clone(),
            token: planted.token,
            token_hash: planted.token_hash,
            expires_at: fixture.election.end_time,
            status: LinkStatus::Used,
            email_sent: true,
            email_sent_at: None,
            accessed_at: None,
            access_count: 0,
            generated_by: Id::new(),
            created_at: Utc::now(),
            used_at: Some(Utc::now()),
            active_slot: Some(VotingLink::slot_key(second.id, fixture.election.id)),
        };
        let mut tx = fixture.store.begin().await.unwrap();
        tx.insert_link(&blocking).await.unwrap();
        tx.commit().await.unwrap();

        let result = fixture
            .voting
            .generate_voting_links(
                fixture.election.id,
                Some(vec![first.id, second.id]),
                &fixture.organiser,
            )
            .await;
        assert!(matches!(result, Err(Error::Constraint(_))));

        let sent = fixture.mailer.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, first.email);
        let mut view = fixture.store.snapshot().await.unwrap();
        let link = view
            .live_link(first.id, fixture.election.id)
            .await
            .unwrap()
            .unwrap();
        assert!(link.email_sent);
        assert_eq!(link.status, LinkStatus::Sent);
    }

    #[rocket::async_test]
    async fn listed_members_are_checked() {
        let fixture = Fixture::new().await;
        let unknown = Id::new();
        let generated = fixture
            .voting
            .generate_voting_links(
                fixture.election.id,
                Some(vec![unknown, fixture.outsider.id, fixture.members[1].id]),
                &fixture.organiser,
            )
            .await
            .unwrap();

        assert_eq!(generated.total, 1);
        assert_eq!(generated.links[0].member_id, fixture.members[1].id.into());
        let reasons: Vec<_> = generated.skipped.iter().map(|s| s.reason).collect();
        assert_eq!(
            reasons,
            vec![Ineligibility::Unknown, Ineligibility::OtherChapter]
        );
    }

    #[rocket::async_test]
    async fn failed_email_leaves_link_pending() {
        let mailer = RecordingMailer {
            fail: true,
            ..Default::default()
        };
        let fixture = Fixture::build(ElectionCore::example(), mailer).await;
        let generated = fixture
            .voting
            .generate_voting_links(
                fixture.election.id,
                Some(vec![fixture.members[0].id]),
                &fixture.organiser,
            )
            .await
            .unwrap();
        assert_eq!(generated.total, 1);
        assert!(!generated.links[0].link.email_sent);

        let link = fixture
            .store
            .snapshot()
            .await
            .unwrap()
            .link(generated.links[0].link.id.into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(link.status, LinkStatus::Pending);
    }

    #[rocket::async_test]
    async fn finished_elections_get_no_links() {
        let ended = Fixture::with_election(Fixture::ended(ElectionCore::example())).await;
        assert!(matches!(
            ended
                .voting
                .generate_voting_links(ended.election.id, None, &ended.organiser)
                .await,
            Err(Error::ElectionWindowClosed)
        ));

        let closed = Fixture::with_election(ElectionCore {
            status: ElectionStatus::Closed,
            ..ElectionCore::example()
        })
        .await;
        assert!(matches!(
            closed
                .voting
                .generate_voting_links(closed.election.id, None, &closed.organiser)
                .await,
            Err(Error::ElectionNotActive)
        ));

        assert!(matches!(
            closed
                .voting
                .generate_voting_links(Id::new(), None, &closed.organiser)
                .await,
            Err(Error::ElectionNotFound)
        ));
    }

    #[rocket::async_test]
    async fn lapsed_links_are_replaced() {
        let fixture = Fixture::new().await;
        let member = &fixture.members[0];

        // Plant a live link that has already run out.
        let stale = fixture.voting.codec.generate(&TokenPayload {
            member_id: member.id,
            election_id: fixture.election.id,
            issued_at: Utc::now() - Duration::days(3),
        });
        let lapsed = VotingLink {
            id: Id::new(),
            member_id: member.id,
            member_email: member.email.clone(),
            election_id: fixture.election.id,
            chapter: fixture.election.chapter.clone(),
            token: stale.token.clone(),
            token_hash: stale.token_hash.clone(),
            expires_at: Utc::now() - Duration::hours(1),
            status: LinkStatus::Sent,
            email_sent: true,
            email_sent_at: None,
            accessed_at: None,
            access_count: 0,
            generated_by: Id::new(),
            created_at: Utc::now() - Duration::days(3),
            used_at: None,
            active_slot: Some(VotingLink::slot_key(member.id, fixture.election.id)),
        };
        let mut tx = fixture.store.begin().await.unwrap();
        tx.insert_link(&lapsed).await.unwrap();
        tx.commit().await.unwrap();

        let generated = fixture
            .voting
            .generate_voting_links(fixture.election.id, Some(vec![member.id]), &fixture.organiser)
            .await
            .unwrap();
        assert!(!generated.links[0].already_exists);
        assert_ne!(generated.links[0].link.token, stale.token);

        let mut view = fixture.store.snapshot().await.unwrap();
        let old = view
            .link_by_hash(&TokenCodec::hash_token(&stale.token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(old.status, LinkStatus::Expired);
    }

    #[rocket::async_test]
    async fn revoked_links_stop_working() {
        let fixture = Fixture::new().await;
        let member = &fixture.members[0];
        let generated = fixture
            .voting
            .generate_voting_links(fixture.election.id, Some(vec![member.id]), &fixture.organiser)
            .await
            .unwrap();
        let issued = &generated.links[0].link;

        let revoked = fixture
            .voting
            .revoke_voting_link(issued.id.into(), &fixture.organiser)
            .await
            .unwrap();
        assert_eq!(revoked.status, LinkStatus::Revoked);

        assert!(matches!(
            fixture
                .voting
                .revoke_voting_link(issued.id.into(), &fixture.organiser)
                .await,
            Err(Error::LinkRevoked)
        ));

        let mut request = fixture.vote(member, 0, 0);
        request.token = Some(issued.token.clone());
        assert!(matches!(
            fixture.voting.cast_vote(request).await,
            Err(Error::LinkRevoked)
        ));

        // A fresh link can be issued afterwards.
        let again = fixture
            .voting
            .generate_voting_links(fixture.election.id, Some(vec![member.id]), &fixture.organiser)
            .await
            .unwrap();
        assert!(!again.links[0].already_exists);
    }
}
