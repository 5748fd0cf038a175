//! JSON bodies for errors raised by Rocket itself: failing guards, unparseable
//! bodies and unknown routes. Errors returned from handlers carry their own
//! message via the [`Error`](crate::error::Error) responder instead.

use rocket::{serde::json::Json, Catcher, Request};

use crate::error::ErrorMessage;

pub fn catchers() -> Vec<Catcher> {
    catchers![
        bad_request,
        unauthorized,
        forbidden,
        not_found,
        unprocessable_entity,
        internal_error,
    ]
}

#[catch(400)]
fn bad_request(_req: &Request) -> Json<ErrorMessage> {
    Json(ErrorMessage::new("Bad request."))
}

#[catch(401)]
fn unauthorized(_req: &Request) -> Json<ErrorMessage> {
    Json(ErrorMessage::new("Unauthorized. Invalid or missing token."))
}

#[catch(403)]
fn forbidden(_req: &Request) -> Json<ErrorMessage> {
    Json(ErrorMessage::new("Only an admin can perform this action."))
}

#[catch(404)]
fn not_found(req: &Request) -> Json<ErrorMessage> {
    Json(ErrorMessage::new(format!("No route for {}", req.uri().path())))
}

#[catch(422)]
fn unprocessable_entity(_req: &Request) -> Json<ErrorMessage> {
    Json(ErrorMessage::new("Invalid request data."))
}

#[catch(500)]
fn internal_error(_req: &Request) -> Json<ErrorMessage> {
    Json(ErrorMessage::new(
        "Something went wrong. Please try again later.",
    ))
}
