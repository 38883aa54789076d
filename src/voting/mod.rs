//! The vote commit coordinator: the one place that turns an authenticated
//! cast request into at most one ledger commit per (voter, election) pair.

pub mod gate;
pub mod reconciler;
pub mod status;
pub mod token;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ledger::{CommitOutcome, LedgerClient, LedgerReceipt};
use crate::model::common::election::{CandidateId, ElectionId, VoterId};

use gate::{Authorization, DenialReason, EligibilityGate};
use status::{ReserveOutcome, VoteStatusStore};
use token::{TokenHasher, VoterToken};

/// What a cast attempt came to.
#[derive(Debug, Clone)]
pub enum CastOutcome {
    /// The vote is on the ledger and the local status is committed.
    Committed {
        receipt: LedgerReceipt,
        token: VoterToken,
    },
    /// Turned away before any state was touched.
    Denied(DenialReason),
    /// The pair already holds a reservation or a committed vote.
    AlreadyVoted,
    /// The ledger definitively refused; the reservation was rolled back and
    /// the voter may try again.
    Rejected(String),
    /// The ledger outcome is unknown; the reservation is held for
    /// reconciliation and the voter keeps their place.
    Pending,
}

/// Orchestrates a cast: gate, reserve, anonymise, commit, settle.
///
/// The reservation is the only lock anywhere in the flow. Everything after
/// it runs on the caller's own task, so a slow ledger never blocks
/// unrelated votes.
pub struct VoteCoordinator<G, S> {
    gate: G,
    store: S,
    ledger: Arc<dyn LedgerClient>,
    hasher: TokenHasher,
}

impl<G, S> VoteCoordinator<G, S>
where
    G: EligibilityGate,
    S: VoteStatusStore,
{
    pub fn new(gate: G, store: S, ledger: Arc<dyn LedgerClient>, hasher: TokenHasher) -> Self {
        Self {
            gate,
            store,
            ledger,
            hasher,
        }
    }

    /// Cast a vote on behalf of `voter_id`.
    pub async fn cast_vote(
        &self,
        voter_id: VoterId,
        election_id: ElectionId,
        candidate_id: CandidateId,
    ) -> Result<CastOutcome> {
        // 1. Authorisation. Nothing has been written yet, so a denial needs
        // no cleanup.
        match self
            .gate
            .check(voter_id, election_id, candidate_id)
            .await?
        {
            Authorization::Authorized => {}
            Authorization::Denied(reason) => return Ok(CastOutcome::Denied(reason)),
        }

        // 2. Atomically claim the pair. Losers stop here without ever
        // reaching the ledger.
        match self.store.reserve(election_id, voter_id).await? {
            ReserveOutcome::Reserved => {}
            ReserveOutcome::AlreadyReserved | ReserveOutcome::AlreadyCommitted => {
                return Ok(CastOutcome::AlreadyVoted);
            }
        }

        // 3. The ledger sees the token, never the voter.
        let token = self.hasher.derive(voter_id, election_id);

        // 4. One external commit, then settle the reservation to match.
        match self.ledger.commit(election_id, candidate_id, &token).await {
            CommitOutcome::Success(receipt) => {
                if !self.store.finalize(election_id, voter_id, &receipt).await? {
                    // The ledger counted the vote but our reservation is
                    // gone. Reconciliation will settle the record from the
                    // ledger's side; surface the fault instead of guessing.
                    error!(
                        "Ledger committed {receipt} for election {election_id} but the local \
reservation was missing"
                    );
                    return Err(Error::internal(format!(
                        "Vote recorded on the ledger but not locally for election {election_id}"
                    )));
                }
                info!("Vote committed for election {election_id}: {receipt}");
                Ok(CastOutcome::Committed { receipt, token })
            }
            CommitOutcome::Rejected(reason) => {
                // Definitive refusal: give the place back.
                self.store.release(election_id, voter_id).await?;
                warn!("Ledger rejected a vote for election {election_id}: {reason}");
                Ok(CastOutcome::Rejected(reason))
            }
            CommitOutcome::Ambiguous => {
                // The commit may have landed. Keep the reservation and let
                // reconciliation find out.
                self.store.mark_pending(election_id, voter_id, &token).await?;
                warn!(
                    "Ledger outcome unknown for election {election_id}; reservation held for \
reconciliation"
                );
                Ok(CastOutcome::Pending)
            }
        }
    }
}
