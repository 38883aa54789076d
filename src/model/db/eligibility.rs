use serde::{Deserialize, Serialize};

use crate::model::common::election::{ElectionId, VoterId};

/// Authorisation for a voter to take part in an election, as stored in the
/// database. Created by the administrative subsystem; read-only here.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct EligibilityRecord {
    /// The election the voter may vote in.
    pub election_id: ElectionId,
    /// The voter.
    pub voter_id: VoterId,
}
