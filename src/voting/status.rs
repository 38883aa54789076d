use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::ledger::LedgerReceipt;
use crate::model::{
    common::election::{ElectionId, VoterId},
    db::vote_status::AnyVoteStatus,
};
use crate::voting::token::VoterToken;

/// The result of attempting to reserve a (election, voter) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// The caller now holds the reservation and may proceed to the ledger.
    Reserved,
    /// Another request holds the reservation or is awaiting reconciliation.
    AlreadyReserved,
    /// The pair already has a committed vote.
    AlreadyCommitted,
}

/// A reservation awaiting reconciliation against the ledger.
#[derive(Debug, Clone)]
pub struct PendingVote {
    pub election_id: ElectionId,
    pub voter_id: VoterId,
    /// The token presented to the ledger, if it was recorded before the
    /// request died. Derivation is deterministic, so an absent token can be
    /// recomputed.
    pub token: Option<VoterToken>,
    /// When the reservation last changed state.
    pub since: DateTime<Utc>,
}

/// Capability over the durable per-(election, voter) commit status.
///
/// `reserve` is the concurrency choke point of the whole system: of any
/// number of concurrent callers for the same pair, exactly one receives
/// [`ReserveOutcome::Reserved`]. Implementations must back this with the
/// storage layer's own atomicity (a unique index plus a conditional update),
/// never a read followed by a write.
#[rocket::async_trait]
pub trait VoteStatusStore: Send + Sync {
    /// Atomically claim the pair. Returns [`ReserveOutcome::Reserved`] iff
    /// the pair was unreserved or released.
    async fn reserve(&self, election_id: ElectionId, voter_id: VoterId)
        -> Result<ReserveOutcome>;

    /// Transition a held reservation to committed, persisting the receipt.
    /// Returns whether the transition applied; callers that hold the
    /// reservation should treat `false` as an invariant breach.
    async fn finalize(
        &self,
        election_id: ElectionId,
        voter_id: VoterId,
        receipt: &LedgerReceipt,
    ) -> Result<bool>;

    /// Roll a held reservation back, permitting a fresh attempt. Only valid
    /// when the external commit definitively failed, never on an ambiguous
    /// outcome. Returns whether the transition applied.
    async fn release(&self, election_id: ElectionId, voter_id: VoterId) -> Result<bool>;

    /// Flag a held reservation as awaiting reconciliation, recording the
    /// token it presented to the ledger. Returns whether the transition
    /// applied.
    async fn mark_pending(
        &self,
        election_id: ElectionId,
        voter_id: VoterId,
        token: &VoterToken,
    ) -> Result<bool>;

    /// The pair's current status, or `None` if it was never reserved.
    async fn status(
        &self,
        election_id: ElectionId,
        voter_id: VoterId,
    ) -> Result<Option<AnyVoteStatus>>;

    /// Every reservation awaiting reconciliation: all pending entries, plus
    /// reservations untouched since `reserved_cutoff` (orphaned by a request
    /// that died before recording an outcome).
    async fn needs_reconciliation(
        &self,
        reserved_cutoff: DateTime<Utc>,
    ) -> Result<Vec<PendingVote>>;
}

/// In-memory store with the same transition semantics as the database one,
/// for exercising the coordinator without external services.
#[cfg(test)]
pub mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::model::{
        common::vote::{Committed, PendingReconciliation, Released, Reserved},
        db::vote_status::VoteStatus,
    };

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum State {
        Reserved,
        Pending,
        Committed,
        Released,
    }

    #[derive(Debug, Clone)]
    struct Entry {
        state: State,
        token: Option<VoterToken>,
        receipt: Option<LedgerReceipt>,
        updated_at: DateTime<Utc>,
    }

    #[derive(Default)]
    pub struct MemoryVoteStatusStore {
        entries: Mutex<HashMap<(ElectionId, VoterId), Entry>>,
    }

    impl MemoryVoteStatusStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Backdate an entry's last transition, to simulate age.
        pub fn backdate(&self, election_id: ElectionId, voter_id: VoterId, to: DateTime<Utc>) {
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(&(election_id, voter_id)) {
                entry.updated_at = to;
            }
        }
    }

    impl Entry {
        fn to_status(&self, election_id: ElectionId, voter_id: VoterId) -> AnyVoteStatus {
            macro_rules! status {
                ($marker:expr) => {
                    VoteStatus {
                        election_id,
                        voter_id,
                        state: $marker,
                        updated_at: self.updated_at,
                        token: self.token.clone(),
                        receipt: self.receipt.clone(),
                    }
                };
            }
            match self.state {
                State::Reserved => AnyVoteStatus::Reserved(status!(Reserved)),
                State::Pending => AnyVoteStatus::Pending(status!(PendingReconciliation)),
                State::Committed => AnyVoteStatus::Committed(status!(Committed)),
                State::Released => AnyVoteStatus::Released(status!(Released)),
            }
        }
    }

    #[rocket::async_trait]
    impl VoteStatusStore for MemoryVoteStatusStore {
        async fn reserve(
            &self,
            election_id: ElectionId,
            voter_id: VoterId,
        ) -> Result<ReserveOutcome> {
            let mut entries = self.entries.lock().unwrap();
            match entries.get(&(election_id, voter_id)).map(|e| e.state) {
                None | Some(State::Released) => {
                    entries.insert(
                        (election_id, voter_id),
                        Entry {
                            state: State::Reserved,
                            token: None,
                            receipt: None,
                            updated_at: Utc::now(),
                        },
                    );
                    Ok(ReserveOutcome::Reserved)
                }
                Some(State::Committed) => Ok(ReserveOutcome::AlreadyCommitted),
                Some(State::Reserved) | Some(State::Pending) => {
                    Ok(ReserveOutcome::AlreadyReserved)
                }
            }
        }

        async fn finalize(
            &self,
            election_id: ElectionId,
            voter_id: VoterId,
            receipt: &LedgerReceipt,
        ) -> Result<bool> {
            let mut entries = self.entries.lock().unwrap();
            match entries.get_mut(&(election_id, voter_id)) {
                Some(entry) if matches!(entry.state, State::Reserved | State::Pending) => {
                    entry.state = State::Committed;
                    entry.receipt = Some(receipt.clone());
                    entry.updated_at = Utc::now();
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn release(&self, election_id: ElectionId, voter_id: VoterId) -> Result<bool> {
            let mut entries = self.entries.lock().unwrap();
            match entries.get_mut(&(election_id, voter_id)) {
                Some(entry) if matches!(entry.state, State::Reserved | State::Pending) => {
                    entry.state = State::Released;
                    entry.updated_at = Utc::now();
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn mark_pending(
            &self,
            election_id: ElectionId,
            voter_id: VoterId,
            token: &VoterToken,
        ) -> Result<bool> {
            let mut entries = self.entries.lock().unwrap();
            match entries.get_mut(&(election_id, voter_id)) {
                Some(entry) if entry.state == State::Reserved => {
                    entry.state = State::Pending;
                    entry.token = Some(token.clone());
                    entry.updated_at = Utc::now();
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn status(
            &self,
            election_id: ElectionId,
            voter_id: VoterId,
        ) -> Result<Option<AnyVoteStatus>> {
            let entries = self.entries.lock().unwrap();
            Ok(entries
                .get(&(election_id, voter_id))
                .map(|entry| entry.to_status(election_id, voter_id)))
        }

        async fn needs_reconciliation(
            &self,
            reserved_cutoff: DateTime<Utc>,
        ) -> Result<Vec<PendingVote>> {
            let entries = self.entries.lock().unwrap();
            Ok(entries
                .iter()
                .filter(|(_, entry)| {
                    entry.state == State::Pending
                        || (entry.state == State::Reserved && entry.updated_at <= reserved_cutoff)
                })
                .map(|(&(election_id, voter_id), entry)| PendingVote {
                    election_id,
                    voter_id,
                    token: entry.token.clone(),
                    since: entry.updated_at,
                })
                .collect())
        }
    }

    #[cfg(test)]
    mod tests {
        use chrono::Duration;

        use super::*;

        #[rocket::async_test]
        async fn reserve_is_exclusive() {
            let store = MemoryVoteStatusStore::new();
            assert_eq!(store.reserve(1, 7).await.unwrap(), ReserveOutcome::Reserved);
            assert_eq!(
                store.reserve(1, 7).await.unwrap(),
                ReserveOutcome::AlreadyReserved
            );
            // Other pairs are unaffected.
            assert_eq!(store.reserve(1, 8).await.unwrap(), ReserveOutcome::Reserved);
            assert_eq!(store.reserve(2, 7).await.unwrap(), ReserveOutcome::Reserved);
        }

        #[rocket::async_test]
        async fn released_pairs_may_be_reserved_again() {
            let store = MemoryVoteStatusStore::new();
            assert_eq!(store.reserve(1, 7).await.unwrap(), ReserveOutcome::Reserved);
            assert!(store.release(1, 7).await.unwrap());
            assert_eq!(store.reserve(1, 7).await.unwrap(), ReserveOutcome::Reserved);
        }

        #[rocket::async_test]
        async fn committed_is_terminal() {
            let store = MemoryVoteStatusStore::new();
            let receipt = LedgerReceipt::new("0xabc".to_string());
            store.reserve(1, 7).await.unwrap();
            assert!(store.finalize(1, 7, &receipt).await.unwrap());
            assert_eq!(
                store.reserve(1, 7).await.unwrap(),
                ReserveOutcome::AlreadyCommitted
            );
            // Neither rollback nor a second commit applies.
            assert!(!store.release(1, 7).await.unwrap());
            assert!(!store.finalize(1, 7, &receipt).await.unwrap());
        }

        #[rocket::async_test]
        async fn finalize_requires_a_reservation() {
            let store = MemoryVoteStatusStore::new();
            let receipt = LedgerReceipt::new("0xabc".to_string());
            assert!(!store.finalize(1, 7, &receipt).await.unwrap());
        }

        #[rocket::async_test]
        async fn pending_can_finalize_or_release() {
            let store = MemoryVoteStatusStore::new();
            let token = VoterToken::new("aa11".to_string());
            store.reserve(1, 7).await.unwrap();
            assert!(store.mark_pending(1, 7, &token).await.unwrap());

            store.reserve(2, 7).await.unwrap();
            assert!(store.mark_pending(2, 7, &token).await.unwrap());

            let receipt = LedgerReceipt::new("0xabc".to_string());
            assert!(store.finalize(1, 7, &receipt).await.unwrap());
            assert!(store.release(2, 7).await.unwrap());
        }

        #[rocket::async_test]
        async fn reconciliation_scan_finds_pending_and_stale_reservations() {
            let store = MemoryVoteStatusStore::new();
            let token = VoterToken::new("aa11".to_string());
            let cutoff = Utc::now() - Duration::minutes(5);

            // Pending: always included.
            store.reserve(1, 7).await.unwrap();
            store.mark_pending(1, 7, &token).await.unwrap();
            // Fresh reservation: excluded.
            store.reserve(2, 7).await.unwrap();
            // Stale reservation: included.
            store.reserve(3, 7).await.unwrap();
            store.backdate(3, 7, cutoff - Duration::minutes(1));
            // Committed: excluded.
            store.reserve(4, 7).await.unwrap();
            store
                .finalize(4, 7, &LedgerReceipt::new("0xabc".to_string()))
                .await
                .unwrap();

            let mut pending = store.needs_reconciliation(cutoff).await.unwrap();
            pending.sort_by_key(|p| p.election_id);
            assert_eq!(pending.len(), 2);
            assert_eq!(pending[0].election_id, 1);
            assert_eq!(pending[0].token, Some(token));
            assert_eq!(pending[1].election_id, 3);
            assert_eq!(pending[1].token, None);
        }
    }
}
