#[macro_use]
extern crate rocket;
#[macro_use]
extern crate log;

use rocket::{Build, Rocket};

use config::{ConfigFairing, MailerFairing, StoreFairing, VotingFairing};
use logging::LoggerFairing;

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod notify;
pub mod service;
pub mod store;

/// The server, with every piece of managed state set up on ignite.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(ConfigFairing)
        .attach(StoreFairing)
        .attach(MailerFairing)
        .attach(VotingFairing)
        .attach(LoggerFairing)
}

/// A server over the given in-memory store, logging voting links rather
/// than emailing them.
#[cfg(test)]
pub(crate) fn rocket_for_store(store: store::MemoryStore) -> Rocket<Build> {
    use std::sync::Arc;

    let figment = rocket::Config::figment().merge(("email", "log"));
    rocket::custom(figment)
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(ConfigFairing)
        .manage::<Arc<dyn store::Store>>(Arc::new(store))
        .attach(MailerFairing)
        .attach(VotingFairing)
}
