use std::sync::Arc;

use aws_config::{BehaviorVersion, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_sesv2::{
    config::{Credentials, Region},
    Client as SesClient,
};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::link::TokenCodec;
use crate::notify::{Broadcaster, LogMailer, Mailer, SesMailer};
use crate::service::Voting;
use crate::store::{MemoryStore, MongoStore, Store};

/// Which store backs the voting core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Mongodb,
    Memory,
}

/// How voting links are delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailKind {
    Ses,
    #[default]
    Log,
}

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    voting_url: String,
    cast_retries: u32,
    #[serde(default)]
    store: StoreKind,
    #[serde(default)]
    email: EmailKind,
    email_from: Option<String>,
    // secrets
    jwt_secret: String,
    link_secret: String,
}

impl Config {
    /// Base URL of the ballot page that voting links point to.
    pub fn voting_url(&self) -> &str {
        &self.voting_url
    }

    /// How many times a vote is replayed after a transient storage failure.
    pub fn cast_retries(&self) -> u32 {
        self.cast_retries
    }

    pub fn store(&self) -> StoreKind {
        self.store
    }

    pub fn email(&self) -> EmailKind {
        self.email
    }

    /// Secret key used to verify caller JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Secret key used to sign voting link tokens.
    pub fn link_secret(&self) -> &[u8] {
        self.link_secret.as_bytes()
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // non-secrets
    db_name: String,
    // secrets
    db_uri: String,
}

/// A fairing that sets up the configured store and places it into managed
/// state as an `Arc<dyn Store>`. For MongoDB this connects to the database
/// and ensures the required indexes exist.
pub struct StoreFairing;

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let kind = match rocket.state::<Config>() {
            Some(config) => config.store(),
            None => {
                error!("Store needs the application config");
                return Err(rocket);
            }
        };

        let store: Arc<dyn Store> = match kind {
            StoreKind::Memory => {
                warn!("Using the in-memory store, nothing will be persisted");
                Arc::new(MemoryStore::new())
            }
            StoreKind::Mongodb => {
                // Load the config.
                let config = match rocket.figment().extract::<DbConfig>() {
                    Ok(config) => config,
                    Err(e) => {
                        error!("Failed to load database config");
                        rocket::config::pretty_print_error(e);
                        return Err(rocket);
                    }
                };
                info!("Loaded database config, connecting...");
                match MongoStore::connect(&config.db_uri, &config.db_name).await {
                    Ok(store) => {
                        info!("...database connection online!");
                        Arc::new(store)
                    }
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                }
            }
        };

        Ok(rocket.manage(store))
    }
}

/// Configuration for the AWS connection.
#[derive(Deserialize)]
struct AwsConfig {
    // non-secrets
    aws_region: String,
    aws_access_key_id: String,
    // secrets
    aws_secret_access_key: String,
}

/// A fairing that sets up voting link delivery and places an
/// `Arc<dyn Mailer>` into managed state.
pub struct MailerFairing;

#[rocket::async_trait]
impl Fairing for MailerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Mailer",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (kind, from) = match rocket.state::<Config>() {
            Some(config) => (config.email(), config.email_from.clone()),
            None => {
                error!("Mailer needs the application config");
                return Err(rocket);
            }
        };

        let mailer: Arc<dyn Mailer> = match (kind, from) {
            (EmailKind::Log, _) => {
                info!("Voting links will be logged, not emailed");
                Arc::new(LogMailer)
            }
            (EmailKind::Ses, None) => {
                error!("`email_from` must be set to send email");
                return Err(rocket);
            }
            (EmailKind::Ses, Some(from)) => {
                // Load the config.
                let config = match rocket.figment().extract::<AwsConfig>() {
                    Ok(config) => config,
                    Err(e) => {
                        error!("Failed to load AWS config");
                        rocket::config::pretty_print_error(e);
                        return Err(rocket);
                    }
                };
                // Construct the connection.
                let aws_config = SdkConfig::builder()
                    .region(Region::new(config.aws_region))
                    .credentials_provider(SharedCredentialsProvider::new(Credentials::new(
                        config.aws_access_key_id,
                        config.aws_secret_access_key,
                        None,
                        None,
                        "rocket config",
                    )))
                    .behavior_version(BehaviorVersion::latest())
                    .build();
                info!("Loaded Amazon SES config");
                Arc::new(SesMailer::new(SesClient::new(&aws_config), from))
            }
        };

        Ok(rocket.manage(mailer))
    }
}

/// A fairing that assembles the voting core from the managed config, store
/// and mailer. Must be attached after those.
pub struct VotingFairing;

#[rocket::async_trait]
impl Fairing for VotingFairing {
    fn info(&self) -> Info {
        Info {
            name: "Voting",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let parts = (
            rocket.state::<Config>(),
            rocket.state::<Arc<dyn Store>>(),
            rocket.state::<Arc<dyn Mailer>>(),
        );
        let voting = match parts {
            (Some(config), Some(store), Some(mailer)) => Voting::new(
                store.clone(),
                TokenCodec::new(config.link_secret()),
                mailer.clone(),
                Broadcaster::default(),
                config.voting_url().to_string(),
            ),
            _ => {
                error!("Voting core needs the config, a store and a mailer");
                return Err(rocket);
            }
        };
        Ok(rocket.manage(voting))
    }
}
