use rocket::{serde::json::Json, Route};
use serde::{Deserialize, Serialize};

pub mod candidate;
pub mod election;
pub mod voter;

pub fn routes() -> Vec<Route> {
    let mut routes = routes![health];
    routes.extend(voter::routes());
    routes.extend(election::routes());
    routes.extend(candidate::routes());
    routes.extend(crate::cors::routes());
    routes
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub message: String,
}

#[get("/health")]
pub fn health() -> Json<Health> {
    Json(Health {
        status: "OK".to_string(),
        message: "Server is running".to_string(),
    })
}
