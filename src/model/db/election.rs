use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::common::election::{CandidateId, ElectionId, ElectionState};

/// A view on just the election's top-level metadata.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ElectionMetadata {
    /// Election name.
    pub name: String,
    /// Election state.
    pub state: ElectionState,
    /// Election start time.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_time: DateTime<Utc>,
    /// Election end time.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_time: DateTime<Utc>,
}

/// A candidate standing in a particular election.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Unique ID within the election.
    pub id: CandidateId,
    /// Candidate name.
    pub name: String,
    /// Candidate description.
    pub description: String,
}

/// An election, as stored in the database. Elections are seeded by the
/// administrative subsystem; this crate never writes them.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Election {
    /// Unique ID.
    #[serde(rename = "_id")]
    pub id: ElectionId,
    /// Top-level metadata.
    #[serde(flatten)]
    pub metadata: ElectionMetadata,
    /// Longer description shown to voters.
    pub description: String,
    /// Candidates standing in this election.
    pub candidates: Vec<Candidate>,
}

impl Election {
    /// Look up a candidate by ID.
    pub fn candidate(&self, candidate_id: CandidateId) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == candidate_id)
    }

    /// Is this election accepting votes at the given instant?
    pub fn is_open_at(&self, instant: DateTime<Utc>) -> bool {
        self.metadata.state == ElectionState::Published
            && self.metadata.start_time <= instant
            && instant <= self.metadata.end_time
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_window() {
        let election = Election::open_example(1);
        assert!(election.is_open_at(Utc::now()));
        assert!(!election.is_open_at(election.metadata.start_time - chrono::Duration::seconds(1)));
        assert!(!election.is_open_at(election.metadata.end_time + chrono::Duration::seconds(1)));
    }

    #[test]
    fn draft_elections_are_closed() {
        let election = Election::draft_example(1);
        assert!(!election.is_open_at(Utc::now()));
    }

    #[test]
    fn candidate_lookup() {
        let election = Election::open_example(1);
        assert_eq!(election.candidate(1).unwrap().name, "Alice Appleseed");
        assert!(election.candidate(42).is_none());
    }
}
