use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use rocket::tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::model::mongodb::Id;

/// `(voter, election)`
type Key = (Id, Id);

type Slots = Arc<Mutex<HashMap<Key, Slot>>>;

#[derive(Default)]
struct Slot {
    lock: Arc<AsyncMutex<()>>,
    /// Holders plus waiters.
    users: usize,
}

/// Per-(voter, election) exclusive locks. Ballots by different voters, or by
/// one voter in different elections, never wait for each other.
///
/// Entries are created on demand and removed once nobody holds or awaits them.
#[derive(Default)]
pub struct VoteLocks {
    slots: Slots,
}

impl VoteLocks {
    /// Wait for exclusive access to this voter's ballot in this election.
    pub async fn lock(&self, voter: Id, election: Id) -> VoteGuard {
        let key = (voter, election);
        let lock = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = slots.entry(key).or_default();
            slot.users += 1;
            slot.lock.clone()
        };
        // Registered as a user from here on, so a ballot dropped while still
        // waiting gives the slot back too.
        let mut ballot = VoteGuard {
            key,
            slots: self.slots.clone(),
            guard: None,
        };
        ballot.guard = Some(lock.lock_owned().await);
        ballot
    }

    /// Number of keys currently locked or awaited.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held for the duration of one ballot.
pub struct VoteGuard {
    key: Key,
    slots: Slots,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for VoteGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.users -= 1;
            if slot.users == 0 {
                slots.remove(&self.key);
            }
        }
    }
}
