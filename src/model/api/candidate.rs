use rocket::fs::TempFile;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    api::{election::filled, id::ApiId},
    db::candidate::Candidate,
    mongodb::Id,
};

/// A new candidate as submitted by an admin.
#[derive(Debug, FromForm)]
pub struct CandidateForm<'r> {
    #[field(name = "fullName")]
    pub full_name: Option<String>,
    pub motto: Option<String>,
    #[field(name = "currentElection")]
    pub current_election: Option<String>,
    pub image: Option<TempFile<'r>>,
}

impl<'r> CandidateForm<'r> {
    /// Name, motto, and owning election, all required.
    pub fn fields(&self) -> Result<(String, String, Id)> {
        let (Some(full_name), Some(motto), Some(election)) = (
            filled(&self.full_name),
            filled(&self.motto),
            filled(&self.current_election),
        ) else {
            return Err(Error::Validation("Fill in all fields.".to_string()));
        };
        let election = election
            .parse::<Id>()
            .map_err(|_| Error::Validation("Invalid election id.".to_string()))?;
        Ok((full_name, motto, election))
    }

    pub fn image(&self) -> Option<&TempFile<'r>> {
        self.image.as_ref().filter(|image| image.len() > 0)
    }
}

/// A candidate as shown through the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDescription {
    #[serde(rename = "_id")]
    pub id: ApiId,
    pub full_name: String,
    pub motto: String,
    pub image: String,
    pub election: ApiId,
    pub vote_count: u32,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id.into(),
            election: candidate.election.into(),
            vote_count: candidate.vote_count,
            full_name: candidate.candidate.full_name,
            motto: candidate.candidate.motto,
            image: candidate.candidate.image,
        }
    }
}

/// Response to adding a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateAdded {
    pub message: String,
    pub candidate: CandidateDescription,
}

/// Body of a ballot. The voter is whoever is logged in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub selected_election: ApiId,
}
