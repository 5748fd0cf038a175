use rocket::{form::Form, http::Status, serde::json::Json, Route, State};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::{AdminToken, AuthToken},
        candidate::CandidateDescription,
        election::{ElectionChanged, ElectionDescription, ElectionForm},
        voter::VoterDescription,
    },
    db::election::{ElectionUpdate, NewElection},
    image::ImageHost,
    mongodb::Id,
    store::Db,
};

pub fn routes() -> Vec<Route> {
    routes![
        create_election,
        get_elections,
        get_election,
        update_election,
        delete_election,
        election_candidates,
        election_voters,
    ]
}

#[post("/elections", data = "<form>")]
pub async fn create_election(
    _admin: AdminToken,
    form: Form<ElectionForm<'_>>,
    db: Db,
    config: &State<Config>,
    images: &State<ImageHost>,
) -> Result<(Status, Json<ElectionChanged>)> {
    let (title, description) = form.text("Fill all fields.")?;
    let image = form
        .image()
        .ok_or_else(|| Error::Validation("Choose an image.".to_string()))?;
    ImageHost::check_size(image, config)?;

    let image = images.upload(image).await?;
    let election = db
        .insert_election(NewElection::new(title, description, image))
        .await?;
    info!("Created election {} ({})", election.id, election.title);

    Ok((
        Status::Created,
        Json(ElectionChanged {
            message: "Election created successfully".to_string(),
            election: election.into(),
        }),
    ))
}

#[get("/elections")]
pub async fn get_elections(_token: AuthToken, db: Db) -> Result<Json<Vec<ElectionDescription>>> {
    let elections = db.elections().await?;
    Ok(Json(elections.into_iter().map(Into::into).collect()))
}

#[get("/elections/<election_id>")]
pub async fn get_election(
    _token: AuthToken,
    election_id: Id,
    db: Db,
) -> Result<Json<ElectionDescription>> {
    let election = db
        .election(election_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {election_id}")))?;
    Ok(Json(election.into()))
}

#[patch("/elections/<election_id>", data = "<form>")]
pub async fn update_election(
    _admin: AdminToken,
    election_id: Id,
    form: Form<ElectionForm<'_>>,
    db: Db,
    config: &State<Config>,
    images: &State<ImageHost>,
) -> Result<Json<ElectionChanged>> {
    let (title, description) = form.text("Fill in all fields.")?;
    if let Some(image) = form.image() {
        ImageHost::check_size(image, config)?;
    }

    // Don't upload anything for an election that isn't there.
    if db.election(election_id).await?.is_none() {
        return Err(Error::not_found(format!("Election {election_id}")));
    }
    let image = match form.image() {
        Some(image) => Some(images.upload(image).await?),
        None => None,
    };

    let update = ElectionUpdate {
        title: Some(title),
        description: Some(description),
        image,
    };
    let election = db
        .update_election(election_id, &update)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {election_id}")))?;
    info!("Updated election {election_id}");

    Ok(Json(ElectionChanged {
        message: "Election updated successfully".to_string(),
        election: election.into(),
    }))
}

#[delete("/elections/<election_id>")]
pub async fn delete_election(
    _admin: AdminToken,
    election_id: Id,
    db: Db,
) -> Result<Json<String>> {
    if !db.delete_election(election_id).await? {
        return Err(Error::not_found(format!("Election {election_id}")));
    }
    info!("Deleted election {election_id} and its candidates");
    Ok(Json("Election deleted successfully.".to_string()))
}

#[get("/elections/<election_id>/candidates")]
pub async fn election_candidates(
    _token: AuthToken,
    election_id: Id,
    db: Db,
) -> Result<Json<Vec<CandidateDescription>>> {
    let candidates = db.election_candidates(election_id).await?;
    Ok(Json(candidates.into_iter().map(Into::into).collect()))
}

#[get("/elections/<election_id>/voters")]
pub async fn election_voters(
    _token: AuthToken,
    election_id: Id,
    db: Db,
) -> Result<Json<Vec<VoterDescription>>> {
    let voters = db
        .election_voters(election_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {election_id}")))?;
    Ok(Json(voters.into_iter().map(Into::into).collect()))
}
