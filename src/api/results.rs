use rocket::{
    response::stream::{Event, EventStream},
    serde::json::Json,
    tokio::{select, sync::broadcast::error::RecvError},
    Route, Shutdown, State,
};

use crate::{
    error::Result,
    model::{api::results::ElectionResults, mongodb::Id},
    service::Voting,
};

pub fn routes() -> Vec<Route> {
    routes![election_results, live_updates]
}

/// Results for anyone, once the election allows it.
#[get("/elections/<election_id>/results")]
async fn election_results(
    election_id: Id,
    voting: &State<Voting>,
) -> Result<Json<ElectionResults>> {
    Ok(Json(voting.public_results(election_id).await?))
}

/// A stream of vote updates for one election, for live result pages.
/// Viewers that fall behind skip ahead rather than slow down voting.
#[get("/elections/<election_id>/live")]
async fn live_updates(
    election_id: Id,
    voting: &State<Voting>,
    mut shutdown: Shutdown,
) -> Result<EventStream![]> {
    // Same visibility as the results themselves.
    voting.public_results(election_id).await?;

    let mut updates = voting.broadcaster().subscribe();
    Ok(EventStream! {
        loop {
            let update = select! {
                update = updates.recv() => match update {
                    Ok(update) => update,
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(missed)) => {
                        debug!("Live viewer of {election_id} skipped {missed} updates");
                        continue;
                    }
                },
                _ = &mut shutdown => break,
            };
            if *update.election_id == election_id {
                yield Event::json(&update).event("vote");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use backend_test::backend_test;
    use rocket::{http::Status, local::asynchronous::Client, serde::json::serde_json};

    use crate::api::{auth::Role, bearer};
    use crate::model::{
        api::election::{ElectionDescription, ElectionSpec},
        mongodb::Id,
    };

    async fn create(client: &Client, public_results: bool) -> ElectionDescription {
        client
            .post("/elections")
            .header(bearer(client, Id::new(), Role::Organizer))
            .json(&ElectionSpec {
                public_results,
                ..ElectionSpec::example()
            })
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap()
    }

    #[backend_test]
    async fn private_results_stay_private(client: Client) {
        let election = create(&client, false).await;
        let response = client
            .get(format!("/elections/{}/results", election.id))
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());

        // Organisers can always look.
        let response = client
            .get(format!("/admin/elections/{}/results", election.id))
            .header(bearer(&client, Id::new(), Role::Organizer))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = client
            .get(format!("/elections/{}/live", election.id))
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());
    }

    #[backend_test]
    async fn unknown_election_is_not_found(client: Client) {
        let response = client
            .get(format!("/elections/{}/results", Id::new()))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
        let body: serde_json::Value = response.into_json().await.unwrap();
        assert_eq!(body["error"], "election_not_found");
    }

    #[backend_test]
    async fn public_results_are_open(client: Client) {
        let election = create(&client, true).await;
        let response = client
            .get(format!("/elections/{}/results", election.id))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
    }
}
