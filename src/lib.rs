#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, ImageHostFairing, StoreFairing};
use crate::cors::Cors;
use crate::logging::LoggerFairing;
use crate::model::store::ReconcileFairing;
use crate::voting::VotingService;

pub mod api;
pub mod catchers;
pub mod config;
pub mod cors;
pub mod error;
pub mod logging;
pub mod model;
pub mod voting;

#[cfg(test)]
mod testing;

pub use crate::config::Config;

/// The server, configured from `Rocket.toml` and the environment.
pub fn build() -> Rocket<Build> {
    assemble(rocket::build())
        .attach(StoreFairing)
        .attach(ReconcileFairing)
}

/// Everything except the store, which is provided by the caller.
pub(crate) fn assemble(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(ImageHostFairing)
        .attach(Cors)
        .manage(VotingService::new())
        .mount("/", api::routes())
        .register("/", catchers::catchers())
}
