use argon2::Error as Argon2Error;
use jsonwebtoken::errors::Error as JwtError;
use mongodb::error::Error as DbError;
use reqwest::Error as ImageHostError;
use rocket::{
    http::Status,
    response::{self, Responder},
    serde::json::Json,
    Request, Response,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::mongodb::Id;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Argon2(#[from] Argon2Error),
    #[error(transparent)]
    ImageHost(#[from] ImageHostError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A request body failed a business rule: missing fields, bad password, etc.
    #[error("{0}")]
    Validation(String),
    /// The request refers to entities that exist but do not belong together.
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Voter has already voted in election {0}")]
    AlreadyVoted(Id),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(String),
    /// An upstream service answered, but not with anything we can use.
    #[error("{0}")]
    Upstream(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn forbidden() -> Self {
        Self::Forbidden("Only an admin can perform this action.".to_string())
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::Validation(_) | Self::InvalidRequest(_) | Self::AlreadyVoted(_) => {
                Status::UnprocessableEntity
            }
            Self::Unauthorized(_) => Status::Unauthorized,
            Self::Forbidden(_) => Status::Forbidden,
            Self::NotFound(_) => Status::NotFound,
            Self::Db(_)
            | Self::Jwt(_)
            | Self::Argon2(_)
            | Self::ImageHost(_)
            | Self::Io(_)
            | Self::Upstream(_) => Status::InternalServerError,
        }
    }

    /// The message shown to the client. Upstream failures never leak their detail.
    pub fn public_message(&self) -> String {
        match self {
            Self::AlreadyVoted(_) => "You have already voted in this election.".to_string(),
            _ if self.status() == Status::InternalServerError => {
                "Something went wrong. Please try again later.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

impl ErrorMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        if status == Status::InternalServerError {
            error!("{self}");
        } else {
            debug!("Rejecting request: {self}");
        }
        let body = Json(ErrorMessage::new(self.public_message()));
        Response::build_from(body.respond_to(req)?)
            .status(status)
            .ok()
    }
}
