use rocket::{serde::json::Json, Route, State};

use crate::{
    error::Result,
    model::{
        api::{
            audit::LogView,
            election::{
                CandidateDescription, CandidateSpec, ElectionDescription, ElectionSpec,
                PositionDescription, PositionSpec,
            },
            links::{GeneratedLinks, LinkRequest, LinkSummary},
            pagination::{Paginated, PaginationRequest},
            results::ElectionResults,
            vote::{AnnotatedVote, AnnotationRequest, ReconciliationReport},
        },
        audit::AuditContext,
        mongodb::Id,
        vote::AnnotationKind,
    },
    service::Voting,
};

use super::auth::{Admin, Organizer, RequestMeta};

pub fn routes() -> Vec<Route> {
    routes![
        create_election,
        approve_election,
        start_election,
        close_election,
        cancel_election,
        add_position,
        add_candidate,
        withdraw_candidate,
        generate_links,
        revoke_link,
        election_results,
        dispute_vote,
        invalidate_vote,
        reconcile_tally,
        audit_log,
    ]
}

#[post("/elections", data = "<spec>", format = "json")]
async fn create_election(
    organizer: Organizer,
    meta: RequestMeta,
    spec: Json<ElectionSpec>,
    voting: &State<Voting>,
) -> Result<Json<ElectionDescription>> {
    let ctx = organizer.0.context(&meta);
    let election = voting.create_election(spec.into_inner(), &ctx).await?;
    Ok(Json(election.into()))
}

#[post("/elections/<election_id>/approve")]
async fn approve_election(
    admin: Admin,
    meta: RequestMeta,
    election_id: Id,
    voting: &State<Voting>,
) -> Result<Json<ElectionDescription>> {
    let ctx = admin.0.context(&meta);
    let election = voting.approve_election(election_id, &ctx).await?;
    Ok(Json(election.into()))
}

#[post("/elections/<election_id>/start")]
async fn start_election(
    organizer: Organizer,
    meta: RequestMeta,
    election_id: Id,
    voting: &State<Voting>,
) -> Result<Json<ElectionDescription>> {
    let ctx = organizer.0.context(&meta);
    let election = voting.start_election(election_id, &ctx).await?;
    Ok(Json(election.into()))
}

#[post("/elections/<election_id>/close")]
async fn close_election(
    organizer: Organizer,
    meta: RequestMeta,
    election_id: Id,
    voting: &State<Voting>,
) -> Result<Json<ElectionDescription>> {
    let ctx = organizer.0.context(&meta);
    let election = voting.close_election(election_id, &ctx).await?;
    Ok(Json(election.into()))
}

#[post("/elections/<election_id>/cancel")]
async fn cancel_election(
    organizer: Organizer,
    meta: RequestMeta,
    election_id: Id,
    voting: &State<Voting>,
) -> Result<Json<ElectionDescription>> {
    let ctx = organizer.0.context(&meta);
    let election = voting.cancel_election(election_id, &ctx).await?;
    Ok(Json(election.into()))
}

#[post("/elections/<election_id>/positions", data = "<spec>", format = "json")]
async fn add_position(
    organizer: Organizer,
    meta: RequestMeta,
    election_id: Id,
    spec: Json<PositionSpec>,
    voting: &State<Voting>,
) -> Result<Json<PositionDescription>> {
    let ctx = organizer.0.context(&meta);
    let position = voting
        .add_position(election_id, spec.into_inner(), &ctx)
        .await?;
    Ok(Json(position.into()))
}

#[post("/positions/<position_id>/candidates", data = "<spec>", format = "json")]
async fn add_candidate(
    organizer: Organizer,
    meta: RequestMeta,
    position_id: Id,
    spec: Json<CandidateSpec>,
    voting: &State<Voting>,
) -> Result<Json<CandidateDescription>> {
    let ctx = organizer.0.context(&meta);
    let candidate = voting
        .add_candidate(position_id, spec.into_inner(), &ctx)
        .await?;
    Ok(Json(candidate.into()))
}

#[post("/candidates/<candidate_id>/withdraw")]
async fn withdraw_candidate(
    organizer: Organizer,
    meta: RequestMeta,
    candidate_id: Id,
    voting: &State<Voting>,
) -> Result<Json<CandidateDescription>> {
    let ctx = organizer.0.context(&meta);
    let candidate = voting.withdraw_candidate(candidate_id, &ctx).await?;
    Ok(Json(candidate.into()))
}

#[post("/elections/<election_id>/links", data = "<request>", format = "json")]
async fn generate_links(
    organizer: Organizer,
    meta: RequestMeta,
    election_id: Id,
    request: Json<LinkRequest>,
    voting: &State<Voting>,
) -> Result<Json<GeneratedLinks>> {
    let ctx = organizer.0.context(&meta);
    let member_ids = request
        .into_inner()
        .member_ids
        .map(|ids| ids.into_iter().map(Id::from).collect());
    let generated = voting
        .generate_voting_links(election_id, member_ids, &ctx)
        .await?;
    Ok(Json(generated))
}

#[post("/links/<link_id>/revoke")]
async fn revoke_link(
    organizer: Organizer,
    meta: RequestMeta,
    link_id: Id,
    voting: &State<Voting>,
) -> Result<Json<LinkSummary>> {
    let ctx = organizer.0.context(&meta);
    let link = voting.revoke_voting_link(link_id, &ctx).await?;
    Ok(Json((&link).into()))
}

/// Full results at any stage, for organisers. Every read is audited.
#[get("/admin/elections/<election_id>/results")]
async fn election_results(
    organizer: Organizer,
    meta: RequestMeta,
    election_id: Id,
    voting: &State<Voting>,
) -> Result<Json<ElectionResults>> {
    let ctx = organizer.0.context(&meta);
    let results = voting.election_results(election_id, Some(&ctx)).await?;
    Ok(Json(results))
}

#[post("/votes/<vote_id>/dispute", data = "<request>", format = "json")]
async fn dispute_vote(
    organizer: Organizer,
    meta: RequestMeta,
    vote_id: Id,
    request: Json<AnnotationRequest>,
    voting: &State<Voting>,
) -> Result<Json<AnnotatedVote>> {
    let ctx = organizer.0.context(&meta);
    annotate(voting, vote_id, AnnotationKind::Disputed, request.into_inner(), &ctx).await
}

#[post("/votes/<vote_id>/invalidate", data = "<request>", format = "json")]
async fn invalidate_vote(
    admin: Admin,
    meta: RequestMeta,
    vote_id: Id,
    request: Json<AnnotationRequest>,
    voting: &State<Voting>,
) -> Result<Json<AnnotatedVote>> {
    let ctx = admin.0.context(&meta);
    annotate(voting, vote_id, AnnotationKind::Invalidated, request.into_inner(), &ctx).await
}

async fn annotate(
    voting: &Voting,
    vote_id: Id,
    kind: AnnotationKind,
    request: AnnotationRequest,
    ctx: &AuditContext,
) -> Result<Json<AnnotatedVote>> {
    let vote = voting
        .annotate_vote(vote_id, kind, request.reason.clone(), ctx)
        .await?;
    Ok(Json(AnnotatedVote {
        id: vote.id.into(),
        kind,
        status: vote.status,
        reason: request.reason,
    }))
}

/// Recount the ledger. Reports only, unless `apply` is set.
#[post("/elections/<election_id>/reconcile?<apply>")]
async fn reconcile_tally(
    admin: Admin,
    meta: RequestMeta,
    election_id: Id,
    apply: Option<bool>,
    voting: &State<Voting>,
) -> Result<Json<ReconciliationReport>> {
    let ctx = admin.0.context(&meta);
    let report = voting
        .reconcile_tally(election_id, apply.unwrap_or(false), &ctx)
        .await?;
    Ok(Json(report))
}

#[get("/elections/<election_id>/audit?<page..>")]
async fn audit_log(
    _organizer: Organizer,
    election_id: Id,
    page: PaginationRequest,
    voting: &State<Voting>,
) -> Result<Json<Paginated<LogView>>> {
    Ok(Json(voting.audit_log(election_id, page).await?))
}

#[cfg(test)]
mod tests {
    use backend_test::backend_test;
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::serde_json,
    };

    use super::*;
    use crate::api::{auth::Role, bearer};
    use crate::model::{
        api::{election::ElectionSpec, pagination::Paginated},
        audit::AuditAction,
        election::ElectionStatus,
        member::Member,
    };
    use crate::store::MemoryStore;

    async fn create(client: &Client, spec: &ElectionSpec) -> ElectionDescription {
        let response = client
            .post(uri!(create_election))
            .header(bearer(client, Id::new(), Role::Organizer))
            .header(ContentType::JSON)
            .json(spec)
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        response.into_json().await.unwrap()
    }

    #[backend_test]
    async fn election_lifecycle(client: Client, store: MemoryStore) {
        for name in ["Mo", "Nia"] {
            store.seed_member(Member::example(name)).await;
        }
        let election = create(&client, &ElectionSpec::example()).await;
        assert_eq!(election.status, ElectionStatus::Pending);

        // Build the ballot.
        let response = client
            .post(format!("/elections/{}/positions", election.id))
            .header(bearer(&client, Id::new(), Role::Organizer))
            .json(&PositionSpec::example("Chair", 0))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let position: PositionDescription = response.into_json().await.unwrap();
        let response = client
            .post(format!("/positions/{}/candidates", position.id))
            .header(bearer(&client, Id::new(), Role::Organizer))
            .json(&CandidateSpec::example("Ada", 0))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        // Organisers cannot approve.
        let response = client
            .post(format!("/elections/{}/approve", election.id))
            .header(bearer(&client, Id::new(), Role::Organizer))
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());

        let response = client
            .post(format!("/elections/{}/approve", election.id))
            .header(bearer(&client, Id::new(), Role::Admin))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = client
            .post(format!("/elections/{}/start", election.id))
            .header(bearer(&client, Id::new(), Role::Organizer))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let started: ElectionDescription = response.into_json().await.unwrap();
        assert_eq!(started.status, ElectionStatus::Active);
        assert_eq!(started.total_eligible_voters, 2);

        // Ballot is now fixed.
        let response = client
            .post(format!("/elections/{}/positions", election.id))
            .header(bearer(&client, Id::new(), Role::Organizer))
            .json(&PositionSpec::example("Treasurer", 1))
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());

        // Cannot reopen once closed.
        let response = client
            .post(format!("/elections/{}/close", election.id))
            .header(bearer(&client, Id::new(), Role::Organizer))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let response = client
            .post(format!("/elections/{}/start", election.id))
            .header(bearer(&client, Id::new(), Role::Organizer))
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());
    }

    #[backend_test]
    async fn requires_authentication(client: Client) {
        let response = client
            .post(uri!(create_election))
            .json(&ElectionSpec::example())
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());

        let response = client
            .post(uri!(create_election))
            .header(bearer(&client, Id::new(), Role::Member))
            .json(&ElectionSpec::example())
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());
        let body: serde_json::Value = response.into_json().await.unwrap();
        assert_eq!(body["error"], "forbidden");
    }

    #[backend_test]
    async fn bad_window_is_rejected(client: Client) {
        let spec = ElectionSpec {
            end_time: ElectionSpec::example().start_time,
            ..ElectionSpec::example()
        };
        let response = client
            .post(uri!(create_election))
            .header(bearer(&client, Id::new(), Role::Organizer))
            .json(&spec)
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
        let body: serde_json::Value = response.into_json().await.unwrap();
        assert_eq!(body["error"], "invalid_election_window");
    }

    #[backend_test]
    async fn audit_log_pages(client: Client) {
        let election = create(&client, &ElectionSpec::example()).await;
        for order in 0..3 {
            client
                .post(format!("/elections/{}/positions", election.id))
                .header(bearer(&client, Id::new(), Role::Organizer))
                .json(&PositionSpec::example("Seat", order))
                .dispatch()
                .await;
        }

        let response = client
            .get(format!("/elections/{}/audit?page_num=1&page_size=2", election.id))
            .header(bearer(&client, Id::new(), Role::Organizer))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let page: Paginated<LogView> = response.into_json().await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].action, AuditAction::BallotChanged);

        let response = client
            .get(format!("/elections/{}/audit?page_num=2&page_size=2", election.id))
            .header(bearer(&client, Id::new(), Role::Organizer))
            .dispatch()
            .await;
        let page: Paginated<LogView> = response.into_json().await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[1].action, AuditAction::ElectionCreated);
    }
}
