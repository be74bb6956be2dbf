use rocket::{serde::json::Json, Route, State};

use crate::{
    config::Config,
    error::Result,
    model::api::{
        ballot::BallotView,
        vote::{CastVoteRequest, VoteReceipt},
    },
    service::{CastVote, Voting},
};

use super::auth::{Caller, RequestMeta};

pub fn routes() -> Vec<Route> {
    routes![ballot, cast_vote]
}

/// Open the ballot behind a voting link. Signed-in members must be the
/// member the link was issued to.
#[get("/vote?<token>")]
async fn ballot(
    token: &str,
    caller: Option<Caller>,
    meta: RequestMeta,
    voting: &State<Voting>,
) -> Result<Json<BallotView>> {
    let ctx = match caller {
        Some(ref caller) => caller.context(&meta),
        None => meta.context(),
    };
    let view = voting
        .validate_voting_link(token, caller.map(|c| c.id), &ctx)
        .await?;
    Ok(Json(view))
}

/// Cast a vote as the calling member. Transient storage failures replay the
/// whole cast, which is safe as each attempt is all or nothing.
#[post("/votes", data = "<request>", format = "json")]
async fn cast_vote(
    caller: Caller,
    meta: RequestMeta,
    request: Json<CastVoteRequest>,
    voting: &State<Voting>,
    config: &State<Config>,
) -> Result<Json<VoteReceipt>> {
    let request = request.into_inner();
    let cast = CastVote {
        member_id: caller.id,
        candidate_id: request.candidate_id.into(),
        position_id: request.position_id.into(),
        election_id: request.election_id.into(),
        token: request.token,
        ip_address: meta.ip_address,
        user_agent: meta.user_agent,
    };

    let mut attempt = 0;
    loop {
        match voting.cast_vote(cast.clone()).await {
            Err(e) if e.is_transient() && attempt < config.cast_retries() => {
                attempt += 1;
                warn!("Retrying vote by {} after transient failure ({attempt}): {e}", caller.id);
            }
            result => return result.map(|vote| Json(vote.into())),
        }
    }
}
