//! Persistence for voters, elections and candidates.
//!
//! Every operation that touches more than one record is a single unit of
//! work: either all of its writes are applied or none are.

use std::ops::Deref;
use std::sync::Arc;

use rocket::{
    http::Status,
    outcome::IntoOutcome,
    request::{FromRequest, Outcome, Request},
};

use crate::error::Result;
use crate::model::{
    db::{
        candidate::{Candidate, NewCandidate},
        election::{Election, ElectionUpdate, NewElection},
        voter::{NewVoter, Voter},
    },
    mongodb::Id,
};

mod memory;
mod mongo;
pub mod reconcile;

pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use reconcile::{ReconcileFairing, RepairPlan, Snapshot};

/// One ballot: `voter` votes for `candidate` in `election`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vote {
    pub voter: Id,
    pub election: Id,
    pub candidate: Id,
}

#[rocket::async_trait]
pub trait Store: Send + Sync {
    /// Insert a new voter. Fails with a validation error if the email is taken.
    async fn insert_voter(&self, voter: NewVoter) -> Result<Voter>;

    async fn voter(&self, id: Id) -> Result<Option<Voter>>;

    /// Look up a voter by their (lowercase) email.
    async fn voter_by_email(&self, email: &str) -> Result<Option<Voter>>;

    async fn insert_election(&self, election: NewElection) -> Result<Election>;

    /// All elections, oldest first.
    async fn elections(&self) -> Result<Vec<Election>>;

    async fn election(&self, id: Id) -> Result<Option<Election>>;

    /// Apply an admin edit. Returns the updated election, or `None` if it doesn't exist.
    async fn update_election(&self, id: Id, update: &ElectionUpdate) -> Result<Option<Election>>;

    /// Delete an election together with every candidate standing in it.
    /// Returns `false` if there was no such election.
    async fn delete_election(&self, id: Id) -> Result<bool>;

    /// Candidates whose owning election is `id`. Empty if there is no such election.
    async fn election_candidates(&self, id: Id) -> Result<Vec<Candidate>>;

    /// Voters who have voted in election `id`, or `None` if there is no such election.
    async fn election_voters(&self, id: Id) -> Result<Option<Vec<Voter>>>;

    /// Insert a candidate and register it with its election.
    /// Fails with not-found if the election doesn't exist.
    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate>;

    async fn candidate(&self, id: Id) -> Result<Option<Candidate>>;

    /// Delete a candidate and unregister it from its election.
    /// Returns `false` if there was no such candidate.
    async fn delete_candidate(&self, id: Id) -> Result<bool>;

    /// Record a ballot: bump the candidate's count, mark the voter as having
    /// voted in the election, and add the voter to the election's voter list.
    ///
    /// The voter is only updated if they have not already voted in the
    /// election; otherwise nothing is written and the call fails with
    /// [`Error::AlreadyVoted`](crate::error::Error::AlreadyVoted).
    /// Returns the voter's updated list of voted elections.
    async fn record_vote(&self, vote: Vote) -> Result<Vec<Id>>;

    /// Read everything, for consistency checking.
    async fn snapshot(&self) -> Result<Snapshot>;

    /// Apply the repairs found by a consistency check.
    async fn repair(&self, plan: &RepairPlan) -> Result<()>;
}

/// Handle on the configured store, placed in managed state.
#[derive(Clone)]
pub struct Db(Arc<dyn Store>);

impl Db {
    pub fn new(store: impl Store + 'static) -> Self {
        Self(Arc::new(store))
    }

    /// A fresh, empty in-memory store.
    pub fn memory() -> Self {
        Self::new(MemoryStore::default())
    }
}

impl Deref for Db {
    type Target = dyn Store;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Db {
    type Error = ();

    /// Get the store from managed state.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        req.rocket()
            .state::<Db>()
            .cloned()
            .or_error((Status::InternalServerError, ()))
    }
}
