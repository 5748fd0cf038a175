use rocket::{http::Status, serde::json::Json, Route, State};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::AuthToken,
        id::api_ids,
        voter::{normalize_email, Credentials, LoginResponse, Registration, VoterDescription},
    },
    mongodb::Id,
    store::Db,
};

pub fn routes() -> Vec<Route> {
    routes![register, login, get_voter]
}

#[post("/voters/register", data = "<registration>", format = "json")]
pub async fn register(
    registration: Json<Registration>,
    db: Db,
    config: &State<Config>,
) -> Result<(Status, Json<String>)> {
    let registration = registration.into_inner();
    registration.check_complete()?;

    // Check email uniqueness before anything else about the password, so
    // the duplicate message wins. The store's unique index backs this up.
    if db.voter_by_email(&registration.email()).await?.is_some() {
        return Err(Error::Validation("Email already exist.".to_string()));
    }
    registration.check_password()?;

    let voter = db.insert_voter(registration.into_voter(config)?).await?;
    info!(
        "Registered voter {} ({}{})",
        voter.id,
        voter.email,
        if voter.is_admin { ", admin" } else { "" }
    );
    Ok((
        Status::Created,
        Json(format!("New voter {} created.", voter.full_name)),
    ))
}

#[post("/voters/login", data = "<credentials>", format = "json")]
pub async fn login(
    credentials: Json<Credentials>,
    db: Db,
    config: &State<Config>,
) -> Result<Json<LoginResponse>> {
    credentials.check_complete()?;

    let voter = db
        .voter_by_email(&normalize_email(&credentials.email))
        .await?
        .ok_or_else(Credentials::invalid)?;
    if !voter.verify_password(&credentials.password) {
        debug!("Wrong password for voter {}", voter.id);
        return Err(Credentials::invalid());
    }

    let token = AuthToken::new(&voter).encode(config)?;
    Ok(Json(LoginResponse {
        token,
        id: voter.id.into(),
        voted_elections: api_ids(&voter.voted_elections),
        is_admin: voter.is_admin,
    }))
}

#[get("/voters/<voter_id>")]
pub async fn get_voter(_token: AuthToken, voter_id: Id, db: Db) -> Result<Json<VoterDescription>> {
    let voter = db
        .voter(voter_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Voter {voter_id}")))?;
    Ok(Json(voter.into()))
}
