use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation};
use rocket::{
    http::Status,
    outcome::try_outcome,
    request::{FromRequest, Outcome},
    Request,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{api::id::ApiId, db::voter::Voter, mongodb::Id};

pub const AUTH_HEADER: &str = "Authorization";
pub const BEARER_PREFIX: &str = "Bearer ";

/// An authenticated identity: who is calling, and whether they are an admin.
/// Trusted as-is once the signature and expiry check out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthToken {
    pub id: ApiId,
    pub is_admin: bool,
}

impl AuthToken {
    /// Create a new [`AuthToken`] for the given voter.
    pub fn new(voter: &Voter) -> Self {
        Self {
            id: voter.id.into(),
            is_admin: voter.is_admin,
        }
    }

    /// The authenticated voter.
    pub fn voter_id(&self) -> Id {
        *self.id
    }

    /// Fail with `Forbidden` unless this identity is an admin.
    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(Error::forbidden())
        }
    }

    /// Sign this token into a bearer JWT.
    pub fn encode(self, config: &Config) -> Result<String> {
        let claims = Claims {
            token: self,
            expire_at: Utc::now() + config.auth_ttl(),
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )?;
        Ok(token)
    }

    /// Verify and decode a bearer JWT.
    pub fn decode(token: &str, config: &Config) -> Result<Self> {
        let token = jsonwebtoken::decode(
            token,
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|claims: TokenData<Claims>| claims.claims.token)?;
        Ok(token)
    }
}

/// JWT claims: the token itself plus an expiry time.
#[derive(Serialize, Deserialize)]
struct Claims {
    #[serde(flatten)]
    token: AuthToken,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthToken {
    type Error = Error;

    /// Get an [`AuthToken`] from the `Authorization: Bearer` header.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(config) = req.rocket().state::<Config>() else {
            return Outcome::Error((
                Status::InternalServerError,
                Error::Upstream("Config is not managed".to_string()),
            ));
        };

        let header = req.headers().get_one(AUTH_HEADER);
        let Some(bearer) = header.and_then(|h| h.strip_prefix(BEARER_PREFIX)) else {
            return Outcome::Error((
                Status::Unauthorized,
                Error::Unauthorized("Unauthorized. No token.".to_string()),
            ));
        };

        match Self::decode(bearer.trim(), config) {
            Ok(token) => Outcome::Success(token),
            Err(e) => {
                debug!("Rejecting bearer token: {e}");
                Outcome::Error((
                    Status::Unauthorized,
                    Error::Unauthorized("Unauthorized. Invalid token.".to_string()),
                ))
            }
        }
    }
}

/// An [`AuthToken`] that has passed the admin check.
#[derive(Debug, Clone, Copy)]
pub struct AdminToken(pub AuthToken);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminToken {
    type Error = Error;

    /// Runs before any data guard, so non-admins are refused without the body being read.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let token = try_outcome!(req.guard::<AuthToken>().await);
        match token.require_admin() {
            Ok(()) => Outcome::Success(AdminToken(token)),
            Err(e) => Outcome::Error((Status::Forbidden, e)),
        }
    }
}
