//! Casting ballots.

use crate::error::{Error, Result};
use crate::model::{
    mongodb::Id,
    store::{Store, Vote},
};

mod locks;

pub use locks::{VoteGuard, VoteLocks};

/// Applies ballots to the store, one at a time per voter and election.
/// Lives in managed state.
#[derive(Default)]
pub struct VotingService {
    locks: VoteLocks,
}

impl VotingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cast `voter`'s ballot for `candidate` in `election`.
    ///
    /// `voter` must come from the authenticated identity, never from the
    /// request body. Checks, in order: the candidate exists, it stands in
    /// `election`, and the voter hasn't voted there yet. On success the
    /// candidate's count, the voter's record and the election's voter list are
    /// updated together and the voter's voted elections are returned.
    pub async fn cast_vote(
        &self,
        store: &dyn Store,
        voter: Id,
        election: Id,
        candidate: Id,
    ) -> Result<Vec<Id>> {
        let standing = store
            .candidate(candidate)
            .await?
            .ok_or_else(|| Error::not_found("Candidate"))?;
        if standing.election != election {
            return Err(Error::InvalidRequest(
                "Candidate does not stand in the selected election.".to_string(),
            ));
        }

        let _guard = self.locks.lock(voter, election).await;
        let record = store
            .voter(voter)
            .await?
            .ok_or_else(|| Error::not_found("Voter"))?;
        if record.has_voted_in(election) {
            return Err(Error::AlreadyVoted(election));
        }

        // The store re-checks all of the above atomically; the lock only keeps
        // this process from racing itself.
        let voted = store
            .record_vote(Vote {
                voter,
                election,
                candidate,
            })
            .await?;
        info!("Voter {voter} voted in election {election}");
        Ok(voted)
    }
}
