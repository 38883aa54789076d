use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// Our election IDs are integers.
pub type ElectionId = u32;
/// Our candidate IDs are integers, scoped to their election.
pub type CandidateId = u32;
/// Voter IDs are integers assigned by the external credential issuer.
pub type VoterId = u32;

/// States in the Election lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionState {
    /// Under construction, not yet visible to voters.
    Draft,
    /// Ready, in progress, or completed.
    Published,
    /// Completed and hidden by default.
    Archived,
}

impl From<ElectionState> for Bson {
    fn from(state: ElectionState) -> Self {
        to_bson(&state).expect("Serialisation is infallible")
    }
}
