use chrono::Utc;
use mongodb::bson::doc;

use crate::error::Result;
use crate::model::{
    common::election::{CandidateId, ElectionId, VoterId},
    db::{election::Election, eligibility::EligibilityRecord},
    mongodb::Coll,
};

/// Why a cast attempt was turned away before any state was touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// The election does not exist or is not accepting votes.
    ElectionClosed,
    /// The candidate does not stand in this election.
    UnknownCandidate,
    /// No eligibility record exists for this (voter, election) pair.
    NotEligible,
}

/// The gate's verdict on a cast attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Authorized,
    Denied(DenialReason),
}

/// Capability answering "may this voter cast this vote right now?".
/// Pure read against authorisation state; no side effects, safe to call
/// repeatedly and concurrently.
#[rocket::async_trait]
pub trait EligibilityGate: Send + Sync {
    async fn check(
        &self,
        voter_id: VoterId,
        election_id: ElectionId,
        candidate_id: CandidateId,
    ) -> Result<Authorization>;
}

/// The database-backed gate.
pub struct DbEligibilityGate {
    elections: Coll<Election>,
    eligibility: Coll<EligibilityRecord>,
}

impl DbEligibilityGate {
    pub fn new(elections: Coll<Election>, eligibility: Coll<EligibilityRecord>) -> Self {
        Self {
            elections,
            eligibility,
        }
    }
}

#[rocket::async_trait]
impl EligibilityGate for DbEligibilityGate {
    async fn check(
        &self,
        voter_id: VoterId,
        election_id: ElectionId,
        candidate_id: CandidateId,
    ) -> Result<Authorization> {
        // A nonexistent election reports the same as a closed one; no
        // existence oracle for unauthenticated IDs.
        let election = self
            .elections
            .find_one(doc! { "_id": election_id }, None)
            .await?;
        let election = match election {
            Some(election) if election.is_open_at(Utc::now()) => election,
            _ => return Ok(Authorization::Denied(DenialReason::ElectionClosed)),
        };

        if election.candidate(candidate_id).is_none() {
            return Ok(Authorization::Denied(DenialReason::UnknownCandidate));
        }

        let record = self
            .eligibility
            .find_one(
                doc! { "election_id": election_id, "voter_id": voter_id },
                None,
            )
            .await?;
        Ok(match record {
            Some(_) => Authorization::Authorized,
            None => Authorization::Denied(DenialReason::NotEligible),
        })
    }
}

/// In-memory gate over fixed election and eligibility data, for exercising
/// the coordinator without external services.
#[cfg(test)]
pub mod memory {
    use std::collections::HashSet;

    use super::*;

    #[derive(Default)]
    pub struct MemoryEligibilityGate {
        elections: Vec<Election>,
        eligible: HashSet<(ElectionId, VoterId)>,
    }

    impl MemoryEligibilityGate {
        pub fn new(elections: Vec<Election>) -> Self {
            Self {
                elections,
                eligible: HashSet::new(),
            }
        }

        pub fn admit(mut self, election_id: ElectionId, voter_id: VoterId) -> Self {
            self.eligible.insert((election_id, voter_id));
            self
        }
    }

    #[rocket::async_trait]
    impl EligibilityGate for MemoryEligibilityGate {
        async fn check(
            &self,
            voter_id: VoterId,
            election_id: ElectionId,
            candidate_id: CandidateId,
        ) -> Result<Authorization> {
            let election = self.elections.iter().find(|e| e.id == election_id);
            let election = match election {
                Some(election) if election.is_open_at(Utc::now()) => election,
                _ => return Ok(Authorization::Denied(DenialReason::ElectionClosed)),
            };
            if election.candidate(candidate_id).is_none() {
                return Ok(Authorization::Denied(DenialReason::UnknownCandidate));
            }
            Ok(if self.eligible.contains(&(election_id, voter_id)) {
                Authorization::Authorized
            } else {
                Authorization::Denied(DenialReason::NotEligible)
            })
        }
    }
}
