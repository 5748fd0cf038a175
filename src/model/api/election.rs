use rocket::fs::TempFile;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    api::id::{api_ids, ApiId},
    db::election::Election,
};

/// Trim a text field, treating blank as missing.
pub(crate) fn filled(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// An election as submitted by an admin, either to create it or to edit it.
/// The image is sent as `club`, or as `image`.
#[derive(Debug, FromForm)]
pub struct ElectionForm<'r> {
    pub title: Option<String>,
    pub description: Option<String>,
    #[field(name = "club")]
    #[field(name = "image")]
    pub image: Option<TempFile<'r>>,
}

impl<'r> ElectionForm<'r> {
    /// Title and description, both required.
    pub fn text(&self, missing: &str) -> Result<(String, String)> {
        match (filled(&self.title), filled(&self.description)) {
            (Some(title), Some(description)) => Ok((title, description)),
            _ => Err(Error::Validation(missing.to_string())),
        }
    }

    /// The uploaded image, if a non-empty one was sent.
    pub fn image(&self) -> Option<&TempFile<'r>> {
        self.image.as_ref().filter(|image| image.len() > 0)
    }
}

/// An election as shown through the API. Its image goes by `club`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionDescription {
    #[serde(rename = "_id")]
    pub id: ApiId,
    pub title: String,
    pub description: String,
    #[serde(rename = "club")]
    pub image: String,
    pub candidates: Vec<ApiId>,
    pub voters: Vec<ApiId>,
}

impl From<Election> for ElectionDescription {
    fn from(election: Election) -> Self {
        Self {
            id: election.id.into(),
            candidates: api_ids(&election.candidates),
            voters: api_ids(&election.voters),
            title: election.election.title,
            description: election.election.description,
            image: election.election.image,
        }
    }
}

/// Response to creating or editing an election.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionChanged {
    pub message: String,
    pub election: ElectionDescription,
}
