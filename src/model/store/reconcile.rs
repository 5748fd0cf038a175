//! Startup consistency check.
//!
//! Every multi-record write goes through a single unit of work, but data can
//! still be left inconsistent by a crash mid-way on a deployment without
//! transactions, or by older releases that wrote records one at a time. This
//! pass finds such damage and repairs what can be repaired safely.

use std::collections::{BTreeMap, BTreeSet};

use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};

use super::{Db, Store};
use crate::error::Result;
use crate::model::{
    db::{candidate::Candidate, election::Election, voter::Voter},
    mongodb::Id,
};

/// Everything in the store at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub voters: Vec<Voter>,
    pub elections: Vec<Election>,
    pub candidates: Vec<Candidate>,
}

/// An election whose candidates hold more votes than it has voters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TallyMismatch {
    pub election: Id,
    pub votes: u64,
    pub voters: u64,
}

/// Repairs to apply. Every repair is idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairPlan {
    /// Candidates whose election no longer exists.
    pub orphaned_candidates: Vec<Id>,
    /// `(election, candidate)`: the election lists a candidate that doesn't
    /// exist or stands elsewhere.
    pub dangling_candidate_refs: Vec<(Id, Id)>,
    /// `(election, candidate)`: the candidate stands in the election but isn't listed.
    pub missing_candidate_refs: Vec<(Id, Id)>,
    /// `(voter, election)`: the election lists the voter, but the voter
    /// doesn't list the election.
    pub missing_voted_elections: Vec<(Id, Id)>,
    /// `(election, voter)`: the voter lists the election, but the election
    /// doesn't list the voter.
    pub missing_election_voters: Vec<(Id, Id)>,
    /// Reported only: lost votes cannot be recovered and counts are never decremented.
    pub over_tallied: Vec<TallyMismatch>,
}

impl RepairPlan {
    /// Work out what needs repairing.
    ///
    /// Votes are append-only, so a one-sided "voted in" link is repaired by
    /// adding the missing side rather than removing the present one.
    pub fn for_snapshot(snapshot: &Snapshot) -> Self {
        let mut plan = Self::default();
        let elections: BTreeMap<Id, &Election> =
            snapshot.elections.iter().map(|e| (e.id, e)).collect();
        let voters: BTreeMap<Id, &Voter> = snapshot.voters.iter().map(|v| (v.id, v)).collect();
        let candidates: BTreeMap<Id, &Candidate> =
            snapshot.candidates.iter().map(|c| (c.id, c)).collect();

        // Candidates and their elections.
        for candidate in &snapshot.candidates {
            match elections.get(&candidate.election) {
                None => plan.orphaned_candidates.push(candidate.id),
                Some(election) if !election.candidates.contains(&candidate.id) => plan
                    .missing_candidate_refs
                    .push((election.id, candidate.id)),
                Some(_) => {}
            }
        }
        for election in &snapshot.elections {
            for listed in &election.candidates {
                let stands_here = candidates
                    .get(listed)
                    .map_or(false, |c| c.election == election.id);
                if !stands_here {
                    plan.dangling_candidate_refs.push((election.id, *listed));
                }
            }
        }

        // "Voted in" links. References to records that don't exist are left
        // alone: voters are never deleted, and ballots in a deleted election
        // stay on the voter's record.
        for election in &snapshot.elections {
            for voter_id in &election.voters {
                if let Some(voter) = voters.get(voter_id) {
                    if !voter.has_voted_in(election.id) {
                        plan.missing_voted_elections.push((voter.id, election.id));
                    }
                }
            }
        }
        for voter in &snapshot.voters {
            for election_id in &voter.voted_elections {
                if let Some(election) = elections.get(election_id) {
                    if !election.voters.contains(&voter.id) {
                        plan.missing_election_voters.push((election.id, voter.id));
                    }
                }
            }
        }

        // Tallies, counted after the link repairs above.
        for election in &snapshot.elections {
            let mut voter_set: BTreeSet<Id> = election.voters.iter().copied().collect();
            voter_set.extend(
                plan.missing_election_voters
                    .iter()
                    .filter(|(e, _)| *e == election.id)
                    .map(|(_, v)| *v),
            );
            let votes: u64 = snapshot
                .candidates
                .iter()
                .filter(|c| c.election == election.id)
                .map(|c| u64::from(c.vote_count))
                .sum();
            let voters = voter_set.len() as u64;
            if votes > voters {
                plan.over_tallied.push(TallyMismatch {
                    election: election.id,
                    votes,
                    voters,
                });
            }
        }

        plan
    }

    /// Does this plan change anything?
    pub fn has_repairs(&self) -> bool {
        !(self.orphaned_candidates.is_empty()
            && self.dangling_candidate_refs.is_empty()
            && self.missing_candidate_refs.is_empty()
            && self.missing_voted_elections.is_empty()
            && self.missing_election_voters.is_empty())
    }
}

/// Check the store and repair it. Returns the plan that was applied.
pub async fn reconcile(store: &dyn Store) -> Result<RepairPlan> {
    let snapshot = store.snapshot().await?;
    let plan = RepairPlan::for_snapshot(&snapshot);

    for mismatch in &plan.over_tallied {
        warn!(
            "Election {} has {} votes but only {} voters",
            mismatch.election, mismatch.votes, mismatch.voters
        );
    }
    if !plan.has_repairs() {
        info!("Store is consistent");
        return Ok(plan);
    }

    info!(
        "Repairing store: {} orphaned candidates, {} dangling and {} missing candidate references, {} one-sided vote links",
        plan.orphaned_candidates.len(),
        plan.dangling_candidate_refs.len(),
        plan.missing_candidate_refs.len(),
        plan.missing_voted_elections.len() + plan.missing_election_voters.len(),
    );
    store.repair(&plan).await?;
    Ok(plan)
}

/// A fairing that runs [`reconcile`] once before the server starts.
/// Must be attached after the store is in managed state.
pub struct ReconcileFairing;

#[rocket::async_trait]
impl Fairing for ReconcileFairing {
    fn info(&self) -> Info {
        Info {
            name: "Reconcile",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let Some(db) = rocket.state::<Db>().cloned() else {
            error!("Cannot reconcile: no store configured");
            return Err(rocket);
        };
        match reconcile(&*db).await {
            Ok(_) => Ok(rocket),
            Err(e) => {
                error!("Failed to reconcile store: {e}");
                Err(rocket)
            }
        }
    }
}
