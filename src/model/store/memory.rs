use std::collections::{BTreeMap, HashMap};

use rocket::tokio::sync::RwLock;

use super::{RepairPlan, Snapshot, Store, Vote};
use crate::error::{Error, Result};
use crate::model::{
    db::{
        candidate::{Candidate, NewCandidate},
        election::{Election, ElectionUpdate, NewElection},
        voter::{NewVoter, Voter},
    },
    mongodb::Id,
};

/// In-process store. A single lock covers all three tables, so every
/// multi-record write is trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    voters: BTreeMap<Id, Voter>,
    emails: HashMap<String, Id>,
    elections: BTreeMap<Id, Election>,
    candidates: BTreeMap<Id, Candidate>,
}

/// Append `id` unless it is already present.
fn add_to_set(ids: &mut Vec<Id>, id: Id) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

#[rocket::async_trait]
impl Store for MemoryStore {
    async fn insert_voter(&self, voter: NewVoter) -> Result<Voter> {
        let mut tables = self.tables.write().await;
        if tables.emails.contains_key(&voter.email) {
            return Err(Error::Validation("Email already exist.".to_string()));
        }
        let voter = Voter {
            id: Id::new(),
            voter,
        };
        tables.emails.insert(voter.email.clone(), voter.id);
        tables.voters.insert(voter.id, voter.clone());
        Ok(voter)
    }

    async fn voter(&self, id: Id) -> Result<Option<Voter>> {
        Ok(self.tables.read().await.voters.get(&id).cloned())
    }

    async fn voter_by_email(&self, email: &str) -> Result<Option<Voter>> {
        let tables = self.tables.read().await;
        Ok(tables
            .emails
            .get(email)
            .and_then(|id| tables.voters.get(id))
            .cloned())
    }

    async fn insert_election(&self, election: NewElection) -> Result<Election> {
        let election = Election {
            id: Id::new(),
            election,
        };
        self.tables
            .write()
            .await
            .elections
            .insert(election.id, election.clone());
        Ok(election)
    }

    async fn elections(&self) -> Result<Vec<Election>> {
        Ok(self.tables.read().await.elections.values().cloned().collect())
    }

    async fn election(&self, id: Id) -> Result<Option<Election>> {
        Ok(self.tables.read().await.elections.get(&id).cloned())
    }

    async fn update_election(&self, id: Id, update: &ElectionUpdate) -> Result<Option<Election>> {
        let mut tables = self.tables.write().await;
        Ok(tables.elections.get_mut(&id).map(|election| {
            update.apply(election);
            election.clone()
        }))
    }

    async fn delete_election(&self, id: Id) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if tables.elections.remove(&id).is_none() {
            return Ok(false);
        }
        tables.candidates.retain(|_, candidate| candidate.election != id);
        Ok(true)
    }

    async fn election_candidates(&self, id: Id) -> Result<Vec<Candidate>> {
        let tables = self.tables.read().await;
        Ok(tables
            .candidates
            .values()
            .filter(|candidate| candidate.election == id)
            .cloned()
            .collect())
    }

    async fn election_voters(&self, id: Id) -> Result<Option<Vec<Voter>>> {
        let tables = self.tables.read().await;
        Ok(tables.elections.get(&id).map(|election| {
            election
                .voters
                .iter()
                .filter_map(|voter| tables.voters.get(voter))
                .cloned()
                .collect()
        }))
    }

    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate> {
        let mut tables = self.tables.write().await;
        let candidate = Candidate {
            id: Id::new(),
            candidate,
        };
        let election = tables
            .elections
            .get_mut(&candidate.election)
            .ok_or_else(|| Error::not_found("Election"))?;
        election.candidates.push(candidate.id);
        tables.candidates.insert(candidate.id, candidate.clone());
        Ok(candidate)
    }

    async fn candidate(&self, id: Id) -> Result<Option<Candidate>> {
        Ok(self.tables.read().await.candidates.get(&id).cloned())
    }

    async fn delete_candidate(&self, id: Id) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let Some(candidate) = tables.candidates.remove(&id) else {
            return Ok(false);
        };
        if let Some(election) = tables.elections.get_mut(&candidate.election) {
            election.candidates.retain(|c| *c != id);
        }
        Ok(true)
    }

    async fn record_vote(&self, vote: Vote) -> Result<Vec<Id>> {
        let mut tables = self.tables.write().await;

        // Check everything before touching anything.
        let voter = tables
            .voters
            .get(&vote.voter)
            .ok_or_else(|| Error::not_found("Voter"))?;
        if voter.has_voted_in(vote.election) {
            return Err(Error::AlreadyVoted(vote.election));
        }
        let candidate = tables
            .candidates
            .get(&vote.candidate)
            .ok_or_else(|| Error::not_found("Candidate"))?;
        if candidate.election != vote.election {
            return Err(Error::InvalidRequest(
                "Candidate does not stand in the selected election.".to_string(),
            ));
        }
        if !tables.elections.contains_key(&vote.election) {
            return Err(Error::not_found("Election"));
        }

        // Each lookup below was just checked under the same write lock.
        if let Some(candidate) = tables.candidates.get_mut(&vote.candidate) {
            candidate.vote_count += 1;
        }
        if let Some(election) = tables.elections.get_mut(&vote.election) {
            add_to_set(&mut election.voters, vote.voter);
        }
        let voted = match tables.voters.get_mut(&vote.voter) {
            Some(voter) => {
                voter.voted_elections.push(vote.election);
                voter.voted_elections.clone()
            }
            None => Vec::new(),
        };
        Ok(voted)
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        let tables = self.tables.read().await;
        Ok(Snapshot {
            voters: tables.voters.values().cloned().collect(),
            elections: tables.elections.values().cloned().collect(),
            candidates: tables.candidates.values().cloned().collect(),
        })
    }

    async fn repair(&self, plan: &RepairPlan) -> Result<()> {
        let mut tables = self.tables.write().await;
        for id in &plan.orphaned_candidates {
            tables.candidates.remove(id);
        }
        for (election, candidate) in &plan.dangling_candidate_refs {
            if let Some(election) = tables.elections.get_mut(election) {
                election.candidates.retain(|c| c != candidate);
            }
        }
        for (election, candidate) in &plan.missing_candidate_refs {
            if let Some(election) = tables.elections.get_mut(election) {
                add_to_set(&mut election.candidates, *candidate);
            }
        }
        for (voter, election) in &plan.missing_voted_elections {
            if let Some(voter) = tables.voters.get_mut(voter) {
                add_to_set(&mut voter.voted_elections, *election);
            }
        }
        for (election, voter) in &plan.missing_election_voters {
            if let Some(election) = tables.elections.get_mut(election) {
                add_to_set(&mut election.voters, *voter);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Overwrite a voter directly, bypassing the usual invariants.
    pub(crate) async fn put_voter(&self, voter: Voter) {
        self.tables.write().await.voters.insert(voter.id, voter);
    }

    pub(crate) async fn put_election(&self, election: Election) {
        self.tables
            .write()
            .await
            .elections
            .insert(election.id, election);
    }

    pub(crate) async fn put_candidate(&self, candidate: Candidate) {
        self.tables
            .write()
            .await
            .candidates
            .insert(candidate.id, candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::super::contract;
    use super::*;

    #[async_test]
    async fn voters() {
        contract::voters(&MemoryStore::default()).await;
    }

    #[async_test]
    async fn elections() {
        contract::elections(&MemoryStore::default()).await;
    }

    #[async_test]
    async fn candidates() {
        contract::candidates(&MemoryStore::default()).await;
    }

    #[async_test]
    async fn election_cascade() {
        contract::election_cascade(&MemoryStore::default()).await;
    }

    #[async_test]
    async fn votes() {
        contract::votes(&MemoryStore::default()).await;
    }

    #[async_test]
    async fn concurrent_votes() {
        contract::concurrent_votes(&MemoryStore::default()).await;
    }

    #[async_test]
    async fn repairs_are_idempotent() {
        let store = MemoryStore::default();
        let election = store.insert_election(NewElection::example()).await.unwrap();
        let voter = store.insert_voter(NewVoter::example()).await.unwrap();
        let plan = RepairPlan {
            missing_election_voters: vec![(election.id, voter.id)],
            missing_voted_elections: vec![(voter.id, election.id)],
            ..Default::default()
        };
        store.repair(&plan).await.unwrap();
        store.repair(&plan).await.unwrap();

        let election = store.election(election.id).await.unwrap().unwrap();
        assert_eq!(election.voters, vec![voter.id]);
        let voter = store.voter(voter.id).await.unwrap().unwrap();
        assert_eq!(voter.voted_elections, vec![election.id]);
    }
}
