use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core election data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionCore {
    pub title: String,
    pub description: String,
    /// Opaque reference to the election's image on the image host.
    pub image: String,
    /// Candidates standing in this election. Owned: they are deleted along with it.
    #[serde(default)]
    pub candidates: Vec<Id>,
    /// Voters who have cast a vote in this election.
    #[serde(default)]
    pub voters: Vec<Id>,
}

impl ElectionCore {
    /// A freshly created election has no candidates and no voters.
    pub fn new(title: String, description: String, image: String) -> Self {
        Self {
            title,
            description,
            image,
            candidates: Vec::new(),
            voters: Vec::new(),
        }
    }
}

/// An election without an ID.
pub type NewElection = ElectionCore;

/// An election from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub election: ElectionCore,
}

impl Deref for Election {
    type Target = ElectionCore;

    fn deref(&self) -> &Self::Target {
        &self.election
    }
}

impl DerefMut for Election {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.election
    }
}

/// The admin-editable parts of an election. Anything left as `None` is unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElectionUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
}

impl ElectionUpdate {
    /// Apply this update to an election in place.
    pub fn apply(&self, election: &mut ElectionCore) {
        if let Some(title) = &self.title {
            election.title = title.clone();
        }
        if let Some(description) = &self.description {
            election.description = description.clone();
        }
        if let Some(image) = &self.image {
            election.image = image.clone();
        }
    }
}
