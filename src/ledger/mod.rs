//! The external ledger, modelled as a capability so the coordinator's
//! correctness logic can be exercised against a fake exhibiting every
//! outcome the real gateway can produce.

mod http;
#[cfg(test)]
pub mod mock;

pub use http::{HttpLedgerClient, LedgerFairing};

use std::fmt::{self, Display, Formatter};

use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::common::election::{CandidateId, ElectionId};
use crate::voting::token::VoterToken;

/// The ledger transaction identifier returned on a successful commit.
/// Stored alongside the vote status for audit; never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerReceipt(String);

impl LedgerReceipt {
    pub fn new(receipt: String) -> Self {
        Self(receipt)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for LedgerReceipt {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&LedgerReceipt> for Bson {
    fn from(receipt: &LedgerReceipt) -> Self {
        to_bson(receipt).expect("Serialisation is infallible")
    }
}

/// The three-way outcome of a commit call. `Ambiguous` is its own case and
/// must never be collapsed into failure: the ledger may have applied the
/// commit even though we never saw the response.
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// The ledger accepted the vote.
    Success(LedgerReceipt),
    /// The ledger definitively refused the vote (e.g. the token was already
    /// used, or validation failed). Safe to treat as a failure.
    Rejected(String),
    /// The call's effect cannot be determined (timeout, connection lost
    /// mid-flight). The caller must hold its reservation for reconciliation.
    Ambiguous,
}

/// Errors from the reconciliation lookup. Unlike commits, lookups are pure
/// reads, so the caller just retries them later.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger gateway unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

/// Capability over the external ledger gateway.
#[rocket::async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a vote. The ledger deduplicates on `token`, so resubmitting
    /// the same logical vote cannot double count.
    async fn commit(
        &self,
        election_id: ElectionId,
        candidate_id: CandidateId,
        token: &VoterToken,
    ) -> CommitOutcome;

    /// Ask whether a token was ever committed for the given election.
    async fn lookup(
        &self,
        election_id: ElectionId,
        token: &VoterToken,
    ) -> Result<Option<LedgerReceipt>, LedgerError>;
}
