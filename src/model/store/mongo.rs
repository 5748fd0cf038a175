use mongodb::{
    bson::{doc, Document},
    error::{Error as DbError, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    options::{FindOneAndUpdateOptions, ReturnDocument},
    Client, ClientSession, Database,
};
use rocket::futures::TryStreamExt;

use super::{RepairPlan, Snapshot, Store, Vote};
use crate::error::{Error, Result};
use crate::model::{
    db::{
        candidate::{Candidate, NewCandidate},
        election::{Election, ElectionUpdate, NewElection},
        voter::{NewVoter, Voter},
    },
    mongodb::{ensure_indexes_exist, is_duplicate_key_error, Coll, Id},
};

/// How many times a transaction is attempted before a transient failure is
/// reported to the caller.
const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

/// Run `$op` (an expression using `$session`) inside a transaction, retrying
/// the whole transaction on transient errors and the commit on unknown commit
/// results. Any error aborts the transaction.
macro_rules! transaction {
    ($store:expr, $session:ident => $op:expr) => {{
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut $session = $store.client.start_session(None).await?;
            $session.start_transaction(None).await?;
            match $op.await {
                Ok(value) => match commit(&mut $session).await {
                    Ok(()) => break Ok(value),
                    Err(e)
                        if e.contains_label(TRANSIENT_TRANSACTION_ERROR)
                            && attempt < MAX_TRANSACTION_ATTEMPTS =>
                    {
                        warn!("Transaction commit conflicted (attempt {attempt}), retrying: {e}");
                    }
                    Err(e) => break Err(Error::from(e)),
                },
                Err(Error::Db(e))
                    if e.contains_label(TRANSIENT_TRANSACTION_ERROR)
                        && attempt < MAX_TRANSACTION_ATTEMPTS =>
                {
                    warn!("Transaction conflicted (attempt {attempt}), retrying: {e}");
                    abort(&mut $session).await;
                }
                Err(e) => {
                    abort(&mut $session).await;
                    break Err(e);
                }
            }
        }
    }};
}

/// Commit, retrying while the outcome of the commit is unknown.
async fn commit(session: &mut ClientSession) -> std::result::Result<(), DbError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match session.commit_transaction().await {
            Err(e)
                if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                    && attempt < MAX_TRANSACTION_ATTEMPTS =>
            {
                warn!("Unknown commit result (attempt {attempt}), retrying commit: {e}");
            }
            result => return result,
        }
    }
}

async fn abort(session: &mut ClientSession) {
    if let Err(e) = session.abort_transaction().await {
        warn!("Failed to abort transaction: {e}");
    }
}

/// MongoDB-backed store. Multi-document writes use transactions, so the
/// server must be a replica set.
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    /// Connect to the given deployment and prepare the named database.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(db_name);
        ensure_indexes_exist(&db).await?;
        Ok(Self { client, db })
    }

    /// The underlying database, e.g. for dropping it after a test.
    pub fn database(&self) -> &Database {
        &self.db
    }

    fn voters(&self) -> Coll<Voter> {
        Coll::from_db(&self.db)
    }

    fn elections(&self) -> Coll<Election> {
        Coll::from_db(&self.db)
    }

    fn candidates(&self) -> Coll<Candidate> {
        Coll::from_db(&self.db)
    }

    async fn delete_election_in(&self, session: &mut ClientSession, id: Id) -> Result<bool> {
        let result = self
            .elections()
            .delete_one_with_session(id.as_doc(), None, session)
            .await?;
        if result.deleted_count == 0 {
            return Ok(false);
        }
        let removed = self
            .candidates()
            .delete_many_with_session(doc! { "election": id }, None, session)
            .await?;
        debug!(
            "Deleting election {id} removes {} candidates",
            removed.deleted_count
        );
        Ok(true)
    }

    async fn insert_candidate_in(
        &self,
        session: &mut ClientSession,
        candidate: &Candidate,
    ) -> Result<()> {
        let update = doc! { "$push": { "candidates": candidate.id } };
        let result = self
            .elections()
            .update_one_with_session(candidate.election.as_doc(), update, None, session)
            .await?;
        if result.matched_count == 0 {
            return Err(Error::not_found("Election"));
        }
        self.candidates()
            .insert_one_with_session(candidate, None, session)
            .await?;
        Ok(())
    }

    async fn delete_candidate_in(&self, session: &mut ClientSession, id: Id) -> Result<bool> {
        let Some(candidate) = self
            .candidates()
            .find_one_and_delete_with_session(id.as_doc(), None, session)
            .await?
        else {
            return Ok(false);
        };
        let update = doc! { "$pull": { "candidates": id } };
        self.elections()
            .update_one_with_session(candidate.election.as_doc(), update, None, session)
            .await?;
        Ok(true)
    }

    async fn record_vote_in(&self, session: &mut ClientSession, vote: Vote) -> Result<Vec<Id>> {
        // Claim the vote on the voter first: this only matches if they have not
        // voted in this election yet, so concurrent ballots conflict here.
        let filter = doc! {
            "_id": vote.voter,
            "votedElections": { "$ne": vote.election },
        };
        let update = doc! { "$push": { "votedElections": vote.election } };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let voter = self
            .voters()
            .find_one_and_update_with_session(filter, update, options, session)
            .await?;
        let Some(voter) = voter else {
            let existing = self
                .voters()
                .find_one_with_session(vote.voter.as_doc(), None, session)
                .await?;
            return Err(match existing {
                Some(_) => Error::AlreadyVoted(vote.election),
                None => Error::not_found("Voter"),
            });
        };

        let filter = doc! {
            "_id": vote.candidate,
            "election": vote.election,
        };
        let update = doc! { "$inc": { "voteCount": 1 } };
        let result = self
            .candidates()
            .update_one_with_session(filter, update, None, session)
            .await?;
        if result.matched_count == 0 {
            let existing = self
                .candidates()
                .find_one_with_session(vote.candidate.as_doc(), None, session)
                .await?;
            return Err(match existing {
                Some(_) => Error::InvalidRequest(
                    "Candidate does not stand in the selected election.".to_string(),
                ),
                None => Error::not_found("Candidate"),
            });
        }

        let update = doc! { "$addToSet": { "voters": vote.voter } };
        let result = self
            .elections()
            .update_one_with_session(vote.election.as_doc(), update, None, session)
            .await?;
        if result.matched_count == 0 {
            return Err(Error::not_found("Election"));
        }

        Ok(voter.voter.voted_elections)
    }

    async fn repair_in(&self, session: &mut ClientSession, plan: &RepairPlan) -> Result<()> {
        if !plan.orphaned_candidates.is_empty() {
            let filter = doc! { "_id": { "$in": plan.orphaned_candidates.clone() } };
            self.candidates()
                .delete_many_with_session(filter, None, session)
                .await?;
        }
        for (election, candidate) in &plan.dangling_candidate_refs {
            let update = doc! { "$pull": { "candidates": *candidate } };
            self.elections()
                .update_one_with_session(election.as_doc(), update, None, session)
                .await?;
        }
        for (election, candidate) in &plan.missing_candidate_refs {
            let update = doc! { "$addToSet": { "candidates": *candidate } };
            self.elections()
                .update_one_with_session(election.as_doc(), update, None, session)
                .await?;
        }
        for (voter, election) in &plan.missing_voted_elections {
            let update = doc! { "$addToSet": { "votedElections": *election } };
            self.voters()
                .update_one_with_session(voter.as_doc(), update, None, session)
                .await?;
        }
        for (election, voter) in &plan.missing_election_voters {
            let update = doc! { "$addToSet": { "voters": *voter } };
            self.elections()
                .update_one_with_session(election.as_doc(), update, None, session)
                .await?;
        }
        Ok(())
    }
}

/// The `$set` part of an election update, or `None` if nothing changes.
fn election_update_doc(update: &ElectionUpdate) -> Option<Document> {
    let mut set = Document::new();
    if let Some(title) = &update.title {
        set.insert("title", title.as_str());
    }
    if let Some(description) = &update.description {
        set.insert("description", description.as_str());
    }
    if let Some(image) = &update.image {
        set.insert("image", image.as_str());
    }
    (!set.is_empty()).then(|| doc! { "$set": set })
}

#[rocket::async_trait]
impl Store for MongoStore {
    async fn insert_voter(&self, voter: NewVoter) -> Result<Voter> {
        let voter = Voter {
            id: Id::new(),
            voter,
        };
        match self.voters().insert_one(&voter, None).await {
            Ok(_) => Ok(voter),
            Err(e) if is_duplicate_key_error(&e) => {
                Err(Error::Validation("Email already exist.".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn voter(&self, id: Id) -> Result<Option<Voter>> {
        Ok(self.voters().find_one(id.as_doc(), None).await?)
    }

    async fn voter_by_email(&self, email: &str) -> Result<Option<Voter>> {
        let filter = doc! { "email": email };
        Ok(self.voters().find_one(filter, None).await?)
    }

    async fn insert_election(&self, election: NewElection) -> Result<Election> {
        let election = Election {
            id: Id::new(),
            election,
        };
        self.elections().insert_one(&election, None).await?;
        Ok(election)
    }

    async fn elections(&self) -> Result<Vec<Election>> {
        let elections = self
            .elections()
            .find(None, None)
            .await?
            .try_collect()
            .await?;
        Ok(elections)
    }

    async fn election(&self, id: Id) -> Result<Option<Election>> {
        Ok(self.elections().find_one(id.as_doc(), None).await?)
    }

    async fn update_election(&self, id: Id, update: &ElectionUpdate) -> Result<Option<Election>> {
        let Some(update) = election_update_doc(update) else {
            return self.election(id).await;
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        Ok(self
            .elections()
            .find_one_and_update(id.as_doc(), update, options)
            .await?)
    }

    async fn delete_election(&self, id: Id) -> Result<bool> {
        transaction!(self, session => self.delete_election_in(&mut session, id))
    }

    async fn election_candidates(&self, id: Id) -> Result<Vec<Candidate>> {
        let candidates = self
            .candidates()
            .find(doc! { "election": id }, None)
            .await?
            .try_collect()
            .await?;
        Ok(candidates)
    }

    async fn election_voters(&self, id: Id) -> Result<Option<Vec<Voter>>> {
        let Some(election) = self.election(id).await? else {
            return Ok(None);
        };
        let filter = doc! { "_id": { "$in": election.voters.clone() } };
        let voters = self
            .voters()
            .find(filter, None)
            .await?
            .try_collect()
            .await?;
        Ok(Some(voters))
    }

    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate> {
        let candidate = Candidate {
            id: Id::new(),
            candidate,
        };
        transaction!(self, session => self.insert_candidate_in(&mut session, &candidate))?;
        Ok(candidate)
    }

    async fn candidate(&self, id: Id) -> Result<Option<Candidate>> {
        Ok(self.candidates().find_one(id.as_doc(), None).await?)
    }

    async fn delete_candidate(&self, id: Id) -> Result<bool> {
        transaction!(self, session => self.delete_candidate_in(&mut session, id))
    }

    async fn record_vote(&self, vote: Vote) -> Result<Vec<Id>> {
        transaction!(self, session => self.record_vote_in(&mut session, vote))
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        let voters = self.voters().find(None, None).await?.try_collect().await?;
        let elections = self
            .elections()
            .find(None, None)
            .await?
            .try_collect()
            .await?;
        let candidates = self
            .candidates()
            .find(None, None)
            .await?
            .try_collect()
            .await?;
        Ok(Snapshot {
            voters,
            elections,
            candidates,
        })
    }

    async fn repair(&self, plan: &RepairPlan) -> Result<()> {
        transaction!(self, session => self.repair_in(&mut session, plan))
    }
}

#[cfg(test)]
mod tests {
    use super::super::contract;
    use super::*;

    /// Run a contract check against a fresh database on the replica set named
    /// by `BALLOT_BOX_TEST_DB_URI`, dropping it afterwards.
    macro_rules! against_mongo {
        ($check:path) => {{
            let uri = std::env::var("BALLOT_BOX_TEST_DB_URI")
                .expect("BALLOT_BOX_TEST_DB_URI must name a MongoDB replica set");
            let store = MongoStore::connect(&uri, &format!("ballot_box_test_{}", Id::new()))
                .await
                .unwrap();
            $check(&store).await;
            store.database().drop(None).await.unwrap();
        }};
    }

    #[async_test]
    #[ignore = "needs a MongoDB replica set"]
    async fn mongo_voters() {
        against_mongo!(contract::voters);
    }

    #[async_test]
    #[ignore = "needs a MongoDB replica set"]
    async fn mongo_elections() {
        against_mongo!(contract::elections);
    }

    #[async_test]
    #[ignore = "needs a MongoDB replica set"]
    async fn mongo_candidates() {
        against_mongo!(contract::candidates);
    }

    #[async_test]
    #[ignore = "needs a MongoDB replica set"]
    async fn mongo_election_cascade() {
        against_mongo!(contract::election_cascade);
    }

    #[async_test]
    #[ignore = "needs a MongoDB replica set"]
    async fn mongo_votes() {
        against_mongo!(contract::votes);
    }

    #[async_test]
    #[ignore = "needs a MongoDB replica set"]
    async fn mongo_concurrent_votes() {
        against_mongo!(contract::concurrent_votes);
    }

    #[test]
    fn empty_update_is_skipped() {
        assert!(election_update_doc(&ElectionUpdate::default()).is_none());
        let update = ElectionUpdate {
            title: Some("Club Chair".to_string()),
            ..Default::default()
        };
        assert_eq!(
            election_update_doc(&update),
            Some(doc! { "$set": { "title": "Club Chair" } })
        );
    }
}
