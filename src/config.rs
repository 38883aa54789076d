use chrono::Duration;
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::mongodb::ensure_indexes_exist;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
///
/// Both secrets are required: there is deliberately no default to fall back
/// on, since a guessable anonymisation secret lets an observer connect
/// ledger tokens back to voters.
#[derive(Clone, Deserialize)]
pub struct Config {
    // non-secrets
    ledger_url: String,
    ledger_timeout_ms: u64,
    ledger_retry_limit: u32,
    reconcile_interval_secs: u32,
    reconcile_grace_secs: u32,
    // secrets
    jwt_secret: String,
    hmac_secret: String,
}

impl Config {
    /// Base URL of the ledger gateway.
    pub fn ledger_url(&self) -> &str {
        &self.ledger_url
    }

    /// Request-level timeout for ledger calls, after which the outcome is
    /// treated as ambiguous.
    pub fn ledger_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.ledger_timeout_ms)
    }

    /// How many times a ledger call may be retried while the connection
    /// cannot be established at all.
    pub fn ledger_retry_limit(&self) -> u32 {
        self.ledger_retry_limit
    }

    /// How often the reconciliation sweep runs.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::seconds(self.reconcile_interval_secs.into())
    }

    /// How long a reservation with no ledger trace is held before it is
    /// released. Must comfortably exceed the ledger timeout, so a sweep
    /// never releases a reservation whose commit is still in flight.
    pub fn reconcile_grace(&self) -> Duration {
        Duration::seconds(self.reconcile_grace_secs.into())
    }

    /// Secret key shared with the credential issuer, used to verify JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Secret key for deriving anonymised voter tokens.
    pub fn hmac_secret(&self) -> &[u8] {
        self.hmac_secret.as_bytes()
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could be achieved using `AdHoc::config`, but is written out
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

        // An empty secret is as bad as a missing one.
        if config.hmac_secret.is_empty() || config.jwt_secret.is_empty() {
            error!("`hmac_secret` and `jwt_secret` must be non-empty");
            return Err(rocket);
        }

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
}

/// A fairing that loads the MongoDB config, connects to the database,
/// performs any setup necessary, and places both a `Client` and a `Database`
/// into managed state.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
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
        // Construct the connection.
        let client = match MongoClient::with_uri_str(config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(DATABASE_NAME);

        // Ensure the required indexes exist; the vote status unique index
        // is what the reservation's atomicity rests on.
        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        // Manage the state.
        rocket = rocket.manage(client).manage(db);
        Ok(rocket)
    }
}

/// The name of the database to use.
const DATABASE_NAME: &str = "chainvote";

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Config {
        pub fn example() -> Self {
            Self {
                ledger_url: "http://localhost:5000".to_string(),
                ledger_timeout_ms: 10_000,
                ledger_retry_limit: 3,
                reconcile_interval_secs: 60,
                reconcile_grace_secs: 300,
                jwt_secret: "an example jwt secret".to_string(),
                hmac_secret: "an example hmac secret".to_string(),
            }
        }
    }
}
