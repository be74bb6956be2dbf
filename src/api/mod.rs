use rocket::{Catcher, Request, Route};

use crate::error::Error;

mod admin;
pub mod auth;
mod results;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(admin::routes());
    routes.extend(voting::routes());
    routes.extend(results::routes());
    routes
}

/// JSON bodies for failures that happen before a handler runs.
pub fn catchers() -> Vec<Catcher> {
    catchers![bad_request, unauthorized, forbidden, unprocessable]
}

#[catch(400)]
fn bad_request(req: &Request) -> Error {
    Error::BadRequest(format!("Could not understand {}", req.uri()))
}

#[catch(401)]
fn unauthorized() -> Error {
    Error::Unauthorized("A valid bearer token is required".to_string())
}

#[catch(403)]
fn forbidden() -> Error {
    Error::Forbidden("Insufficient rights".to_string())
}

#[catch(422)]
fn unprocessable() -> Error {
    Error::BadRequest("Malformed request body".to_string())
}

/// An `Authorization` header for a caller with the given identity.
#[cfg(test)]
pub(crate) fn bearer(
    client: &rocket::local::asynchronous::Client,
    id: crate::model::mongodb::Id,
    role: auth::Role,
) -> rocket::http::Header<'static> {
    let config = client
        .rocket()
        .state::<crate::config::Config>()
        .expect("Config is managed");
    let token = auth::Claims::new(id, role, chrono::Duration::minutes(5)).encode(config.jwt_secret());
    rocket::http::Header::new("Authorization", format!("Bearer {token}"))
}
