use rocket::{form::Form, http::Status, serde::json::Json, Route, State};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::{AdminToken, AuthToken},
        candidate::{CandidateAdded, CandidateDescription, CandidateForm, VoteRequest},
        id::{api_ids, ApiId},
    },
    db::candidate::NewCandidate,
    image::ImageHost,
    mongodb::Id,
    store::Db,
};
use crate::voting::VotingService;

pub fn routes() -> Vec<Route> {
    routes![create_candidate, get_candidate, delete_candidate, vote]
}

#[post("/candidates", data = "<form>")]
pub async fn create_candidate(
    _admin: AdminToken,
    form: Form<CandidateForm<'_>>,
    db: Db,
    config: &State<Config>,
    images: &State<ImageHost>,
) -> Result<(Status, Json<CandidateAdded>)> {
    let (full_name, motto, election) = form.fields()?;
    let image = form
        .image()
        .ok_or_else(|| Error::Validation("Choose an image.".to_string()))?;
    ImageHost::check_size(image, config)?;

    if db.election(election).await?.is_none() {
        return Err(Error::not_found(format!("Election {election}")));
    }
    let image = images.upload(image).await?;

    // Also lists the candidate on its election.
    let candidate = db
        .insert_candidate(NewCandidate::new(full_name, motto, image, election))
        .await?;
    info!(
        "Added candidate {} ({}) to election {election}",
        candidate.id, candidate.full_name
    );

    Ok((
        Status::Created,
        Json(CandidateAdded {
            message: "Candidate added successfully".to_string(),
            candidate: candidate.into(),
        }),
    ))
}

#[get("/candidates/<candidate_id>")]
pub async fn get_candidate(
    _token: AuthToken,
    candidate_id: Id,
    db: Db,
) -> Result<Json<CandidateDescription>> {
    let candidate = db
        .candidate(candidate_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Candidate {candidate_id}")))?;
    Ok(Json(candidate.into()))
}

#[delete("/candidates/<candidate_id>")]
pub async fn delete_candidate(
    _admin: AdminToken,
    candidate_id: Id,
    db: Db,
) -> Result<Json<String>> {
    if !db.delete_candidate(candidate_id).await? {
        return Err(Error::not_found(format!("Candidate {candidate_id}")));
    }
    info!("Deleted candidate {candidate_id}");
    Ok(Json("Candidate deleted successfully.".to_string()))
}

/// Vote for a candidate. The voter is always the logged-in one.
#[patch("/candidates/<candidate_id>", data = "<ballot>", format = "json")]
pub async fn vote(
    token: AuthToken,
    candidate_id: Id,
    ballot: Json<VoteRequest>,
    db: Db,
    voting: &State<VotingService>,
) -> Result<Json<Vec<ApiId>>> {
    let voted = voting
        .cast_vote(
            &*db,
            token.voter_id(),
            *ballot.selected_election,
            candidate_id,
        )
        .await?;
    Ok(Json(api_ids(&voted)))
}

#[cfg(test)]
mod tests {
    use rocket::{
        futures::future::join_all,
        http::{ContentType, Status},
        local::asynchronous::{Client, LocalResponse},
        serde::json::serde_json::json,
    };

    use super::*;
    use crate::error::ErrorMessage;
    use crate::model::api::{election::ElectionDescription, voter::Registration};
    use crate::testing::{
        create_candidate as create_example, create_election, form_body, login, login_voter,
        Session, SMALL_IMAGE,
    };

    async fn message(response: LocalResponse<'_>) -> String {
        response.into_json::<ErrorMessage>().await.unwrap().message
    }

    async fn cast<'c>(
        client: &'c Client,
        voter: &Session,
        candidate: ApiId,
        election: ApiId,
    ) -> LocalResponse<'c> {
        client
            .patch(uri!(vote(*candidate)))
            .header(voter.header())
            .header(ContentType::JSON)
            .body(json!(VoteRequest { selected_election: election }).to_string())
            .dispatch()
            .await
    }

    async fn fetch_candidate(
        client: &Client,
        session: &Session,
        id: ApiId,
    ) -> CandidateDescription {
        client
            .get(uri!(get_candidate(*id)))
            .header(session.header())
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap()
    }

    async fn fetch_election(client: &Client, session: &Session, id: ApiId) -> ElectionDescription {
        client
            .get(uri!(crate::api::election::get_election(*id)))
            .header(session.header())
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap()
    }

    #[backend_test(admin)]
    async fn candidate_is_listed_on_election(client: Client, admin: Session) {
        let election = create_election(&client, &admin, "Club President").await;
        let x = create_example(&client, &admin, election.id, "Grace Hopper").await;
        assert_eq!(x.full_name, "Grace Hopper");
        assert_eq!(x.election, election.id);
        assert_eq!(x.vote_count, 0);

        assert_eq!(fetch_candidate(&client, &admin, x.id).await, x);
        assert_eq!(fetch_election(&client, &admin, election.id).await.candidates, vec![x.id]);

        let response = client
            .delete(uri!(delete_candidate(*x.id)))
            .header(admin.header())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(
            response.into_json::<String>().await.unwrap(),
            "Candidate deleted successfully."
        );
        assert!(fetch_election(&client, &admin, election.id).await.candidates.is_empty());

        let response = client
            .get(uri!(get_candidate(*x.id)))
            .header(admin.header())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());

        let response = client
            .delete(uri!(delete_candidate(*x.id)))
            .header(admin.header())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test(admin)]
    async fn create_validation(client: Client, admin: Session) {
        let election = create_election(&client, &admin, "Club President")
            .await
            .id
            .to_string();
        let missing = Id::new().to_string();
        let cases = [
            (
                form_body(&[
                    ("fullName", "Grace Hopper"),
                    ("currentElection", election.as_str()),
                    ("image", SMALL_IMAGE),
                ]),
                Status::UnprocessableEntity,
                "Fill in all fields.".to_string(),
            ),
            (
                form_body(&[
                    ("fullName", "Grace Hopper"),
                    ("motto", "Ship it"),
                    ("currentElection", "nope"),
                    ("image", SMALL_IMAGE),
                ]),
                Status::UnprocessableEntity,
                "Invalid election id.".to_string(),
            ),
            (
                form_body(&[
                    ("fullName", "Grace Hopper"),
                    ("motto", "Ship it"),
                    ("currentElection", election.as_str()),
                ]),
                Status::UnprocessableEntity,
                "Choose an image.".to_string(),
            ),
            (
                form_body(&[
                    ("fullName", "Grace Hopper"),
                    ("motto", "Ship it"),
                    ("currentElection", missing.as_str()),
                    ("image", SMALL_IMAGE),
                ]),
                Status::NotFound,
                format!("Election {missing} not found"),
            ),
        ];
        for (body, status, expected) in cases {
            let response = client
                .post(uri!(create_candidate))
                .header(admin.header())
                .header(ContentType::Form)
                .body(body)
                .dispatch()
                .await;
            assert_eq!(status, response.status());
            assert_eq!(message(response).await, expected);
        }
    }

    #[backend_test(admin)]
    async fn voter_cannot_add_or_remove(client: Client, admin: Session, db: Db) {
        let election = create_election(&client, &admin, "Club President").await;
        let x = create_example(&client, &admin, election.id, "Grace Hopper").await;
        let voter = login_voter(&client).await;
        let election_id = election.id.to_string();

        let response = client
            .post(uri!(create_candidate))
            .header(voter.header())
            .header(ContentType::Form)
            .body(form_body(&[
                ("fullName", "Alan Turing"),
                ("motto", "Ship it"),
                ("currentElection", election_id.as_str()),
                ("image", SMALL_IMAGE),
            ]))
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());

        let response = client
            .delete(uri!(delete_candidate(*x.id)))
            .header(voter.header())
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());

        assert_eq!(db.election_candidates(*election.id).await.unwrap().len(), 1);
    }

    /// Voter A votes for X in "Club President", then tries again for Y.
    #[backend_test(admin)]
    async fn club_president(client: Client, admin: Session) {
        let election = create_election(&client, &admin, "Club President").await;
        let x = create_example(&client, &admin, election.id, "Grace Hopper").await;
        let y = create_example(&client, &admin, election.id, "Alan Turing").await;
        let a = login_voter(&client).await;

        let response = cast(&client, &a, x.id, election.id).await;
        assert_eq!(Status::Ok, response.status());
        let voted: Vec<ApiId> = response.into_json().await.unwrap();
        assert_eq!(voted, vec![election.id]);
        assert_eq!(fetch_candidate(&client, &a, x.id).await.vote_count, 1);

        let response = cast(&client, &a, y.id, election.id).await;
        assert_eq!(Status::UnprocessableEntity, response.status());
        assert_eq!(message(response).await, "You have already voted in this election.");
        assert_eq!(fetch_candidate(&client, &a, y.id).await.vote_count, 0);
        assert_eq!(
            fetch_election(&client, &a, election.id).await.voters,
            vec![ApiId::from(a.id)]
        );

        let response = client
            .get(uri!(crate::api::voter::get_voter(a.id)))
            .header(a.header())
            .dispatch()
            .await;
        let record: rocket::serde::json::Value = response.into_json().await.unwrap();
        assert_eq!(record["votedElections"], json!([election.id.to_string()]));

        let response = client
            .delete(uri!(crate::api::election::delete_election(*election.id)))
            .header(admin.header())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        for candidate in [x.id, y.id] {
            let response = client
                .get(uri!(get_candidate(*candidate)))
                .header(a.header())
                .dispatch()
                .await;
            assert_eq!(Status::NotFound, response.status());
        }
    }

    #[backend_test(admin)]
    async fn cross_election_ballot(client: Client, admin: Session) {
        let president = create_election(&client, &admin, "Club President").await;
        let treasurer = create_election(&client, &admin, "Treasurer").await;
        let x = create_example(&client, &admin, president.id, "Grace Hopper").await;
        let voter = login_voter(&client).await;

        let response = cast(&client, &voter, x.id, treasurer.id).await;
        assert_eq!(Status::UnprocessableEntity, response.status());
        assert_eq!(
            message(response).await,
            "Candidate does not stand in the selected election."
        );

        assert_eq!(fetch_candidate(&client, &voter, x.id).await.vote_count, 0);
        assert!(fetch_election(&client, &voter, president.id).await.voters.is_empty());
        assert!(fetch_election(&client, &voter, treasurer.id).await.voters.is_empty());

        // The voter can still vote properly afterwards.
        let response = cast(&client, &voter, x.id, president.id).await;
        assert_eq!(Status::Ok, response.status());
    }

    #[backend_test(voter)]
    async fn unknown_candidate(client: Client, voter: Session) {
        let response = cast(&client, &voter, Id::new().into(), Id::new().into()).await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test]
    async fn vote_needs_token(client: Client) {
        let response = client
            .patch(uri!(vote(Id::new())))
            .header(ContentType::JSON)
            .body(json!({ "selectedElection": Id::new().to_string() }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());
    }

    #[backend_test(admin)]
    async fn concurrent_ballots_count_once(client: Client, admin: Session) {
        let election = create_election(&client, &admin, "Club President").await;
        let x = create_example(&client, &admin, election.id, "Grace Hopper").await;
        let y = create_example(&client, &admin, election.id, "Alan Turing").await;
        let eager = Registration::example_for("Eager Voter", "eager@example.com");
        let voter = login(&client, &eager).await;

        let ballots = (0..6).map(|i| {
            let candidate = if i % 2 == 0 { x.id } else { y.id };
            cast(&client, &voter, candidate, election.id)
        });
        let statuses: Vec<Status> = join_all(ballots)
            .await
            .iter()
            .map(|response| response.status())
            .collect();
        assert_eq!(statuses.iter().filter(|s| **s == Status::Ok).count(), 1);
        assert_eq!(
            statuses
                .iter()
                .filter(|s| **s == Status::UnprocessableEntity)
                .count(),
            5
        );

        let votes = fetch_candidate(&client, &admin, x.id).await.vote_count
            + fetch_candidate(&client, &admin, y.id).await.vote_count;
        assert_eq!(votes, 1);
        assert_eq!(
            fetch_election(&client, &admin, election.id).await.voters,
            vec![ApiId::from(voter.id)]
        );
    }
}
