use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::LedgerReceipt;
use crate::model::{
    common::election::{CandidateId, ElectionId, VoterId},
    db::vote_status::AnyVoteStatus,
};
use crate::voting::{status::PendingVote, token::VoterToken};

/// A vote that the voter wishes to cast.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub candidate_id: CandidateId,
}

/// Confirmation of a committed vote. The token lets the voter find their
/// (anonymised) vote on the public ledger.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastVoteResponse {
    pub election_id: ElectionId,
    pub candidate_id: CandidateId,
    pub receipt: LedgerReceipt,
    pub token: VoterToken,
}

/// A voter's own view of their commit status for one election.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum VoteStatusResponse {
    /// No vote attempt has been recorded.
    Unreserved,
    /// A vote is currently in flight.
    Reserved { since: DateTime<Utc> },
    /// The ledger outcome is being reconciled; retry later without losing
    /// your place.
    PendingReconciliation { since: DateTime<Utc> },
    /// The vote is on the ledger.
    Committed {
        receipt: Option<LedgerReceipt>,
        since: DateTime<Utc>,
    },
    /// The last attempt failed definitively; voting again is allowed.
    Released { since: DateTime<Utc> },
}

impl From<Option<AnyVoteStatus>> for VoteStatusResponse {
    fn from(status: Option<AnyVoteStatus>) -> Self {
        match status {
            None => Self::Unreserved,
            Some(AnyVoteStatus::Reserved(s)) => Self::Reserved {
                since: s.updated_at,
            },
            Some(AnyVoteStatus::Pending(s)) => Self::PendingReconciliation {
                since: s.updated_at,
            },
            Some(AnyVoteStatus::Committed(s)) => Self::Committed {
                receipt: s.receipt,
                since: s.updated_at,
            },
            Some(AnyVoteStatus::Released(s)) => Self::Released {
                since: s.updated_at,
            },
        }
    }
}

/// An entry awaiting reconciliation, as shown to admins. Deliberately does
/// not include the ledger token: the local pairing of voter and token stays
/// in the store.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingVoteDescription {
    pub election_id: ElectionId,
    pub voter_id: VoterId,
    pub since: DateTime<Utc>,
}

impl From<PendingVote> for PendingVoteDescription {
    fn from(pending: PendingVote) -> Self {
        Self {
            election_id: pending.election_id,
            voter_id: pending.voter_id,
            since: pending.since,
        }
    }
}
