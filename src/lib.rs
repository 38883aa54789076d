#[macro_use]
extern crate rocket;

#[macro_use]
extern crate log;

pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod scheduled_task;
pub mod voting;

pub use config::Config;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, DatabaseFairing};
use crate::ledger::LedgerFairing;
use crate::logging::LoggerFairing;
use crate::voting::reconciler::ReconcilerFairing;

/// Assemble the server: routes, then fairings in dependency order (the
/// ledger client needs the config; the reconciler needs all three).
pub async fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(LedgerFairing)
        .attach(ReconcilerFairing)
}
