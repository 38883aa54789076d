use chrono::{DateTime, Utc};
use mongodb::bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime, DateTime as BsonDateTime, Document};
use mongodb::options::UpdateOptions;
use rocket::futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ledger::LedgerReceipt;
use crate::model::{
    common::{
        election::{ElectionId, VoterId},
        vote::{Committed, PendingReconciliation, Released, Reserved, VoteState},
    },
    mongodb::{is_duplicate_key_error, Coll},
};
use crate::voting::{
    status::{PendingVote, ReserveOutcome, VoteStatusStore},
    token::VoterToken,
};

/// The commit status of a single (election, voter) pair, as stored in the
/// database. Absence of a document means the pair is unreserved. This is the
/// single source of truth for "has this voter already voted".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "S: VoteState"))]
pub struct VoteStatus<S: VoteState> {
    /// The election voted in.
    pub election_id: ElectionId,
    /// The voter. Never sent to the ledger; the token goes in its place.
    pub voter_id: VoterId,
    /// Current lifecycle state.
    pub state: S,
    /// When the state last changed.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
    /// The anonymised ledger token, recorded once the outcome became
    /// uncertain so reconciliation can be audited.
    pub token: Option<VoterToken>,
    /// The ledger receipt, recorded on commit and never mutated after.
    pub receipt: Option<LedgerReceipt>,
}

/// A vote status in any state. With the untagged representation, the typed
/// statuses all directly deserialize to this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnyVoteStatus {
    Reserved(VoteStatus<Reserved>),
    Pending(VoteStatus<PendingReconciliation>),
    Committed(VoteStatus<Committed>),
    Released(VoteStatus<Released>),
}

/// The durable, MongoDB-backed vote status store.
///
/// Every transition is a single conditional write, guarded by the unique
/// `(election_id, voter_id)` index. No operation ever reads state and then
/// separately decides to write based on that read.
#[derive(Clone)]
pub struct DbVoteStatusStore {
    statuses: Coll<AnyVoteStatus>,
}

impl DbVoteStatusStore {
    pub fn new(statuses: Coll<AnyVoteStatus>) -> Self {
        Self { statuses }
    }
}

/// Filter matching the document for the given pair, whatever its state.
fn pair_filter(election_id: ElectionId, voter_id: VoterId) -> Document {
    doc! {
        "election_id": election_id,
        "voter_id": voter_id,
    }
}

fn bson_now() -> BsonDateTime {
    BsonDateTime::from_chrono(Utc::now())
}

#[rocket::async_trait]
impl VoteStatusStore for DbVoteStatusStore {
    async fn reserve(
        &self,
        election_id: ElectionId,
        voter_id: VoterId,
    ) -> Result<ReserveOutcome> {
        // The filter only matches a released document; a missing document is
        // claimed via the upsert. Any other state leaves the upsert inserting
        // into the unique index, which fails with a duplicate key error and
        // tells us somebody else holds the pair.
        let filter = doc! {
            "election_id": election_id,
            "voter_id": voter_id,
            "state": Released,
        };
        let update = doc! {
            "$set": {
                "state": Reserved,
                "updated_at": bson_now(),
            },
        };
        let options = UpdateOptions::builder().upsert(true).build();

        match self.statuses.update_one(filter, update, options).await {
            Ok(_) => Ok(ReserveOutcome::Reserved),
            Err(err) => {
                if !is_duplicate_key_error::<()>(Err(&err)) {
                    return Err(err.into());
                }
                let holder = self
                    .statuses
                    .find_one(pair_filter(election_id, voter_id), None)
                    .await?;
                Ok(match holder {
                    Some(AnyVoteStatus::Committed(_)) => ReserveOutcome::AlreadyCommitted,
                    _ => ReserveOutcome::AlreadyReserved,
                })
            }
        }
    }

    async fn finalize(
        &self,
        election_id: ElectionId,
        voter_id: VoterId,
        receipt: &LedgerReceipt,
    ) -> Result<bool> {
        let filter = doc! {
            "election_id": election_id,
            "voter_id": voter_id,
            "state": { "$in": [Reserved, PendingReconciliation] },
        };
        let update = doc! {
            "$set": {
                "state": Committed,
                "receipt": receipt,
                "updated_at": bson_now(),
            },
        };
        let result = self.statuses.update_one(filter, update, None).await?;
        Ok(result.matched_count == 1)
    }

    async fn release(&self, election_id: ElectionId, voter_id: VoterId) -> Result<bool> {
        let filter = doc! {
            "election_id": election_id,
            "voter_id": voter_id,
            "state": { "$in": [Reserved, PendingReconciliation] },
        };
        let update = doc! {
            "$set": {
                "state": Released,
                "updated_at": bson_now(),
            },
        };
        let result = self.statuses.update_one(filter, update, None).await?;
        Ok(result.matched_count == 1)
    }

    async fn mark_pending(
        &self,
        election_id: ElectionId,
        voter_id: VoterId,
        token: &VoterToken,
    ) -> Result<bool> {
        let filter = doc! {
            "election_id": election_id,
            "voter_id": voter_id,
            "state": Reserved,
        };
        let update = doc! {
            "$set": {
                "state": PendingReconciliation,
                "token": token,
                "updated_at": bson_now(),
            },
        };
        let result = self.statuses.update_one(filter, update, None).await?;
        Ok(result.matched_count == 1)
    }

    async fn status(
        &self,
        election_id: ElectionId,
        voter_id: VoterId,
    ) -> Result<Option<AnyVoteStatus>> {
        let status = self
            .statuses
            .find_one(pair_filter(election_id, voter_id), None)
            .await?;
        Ok(status)
    }

    async fn needs_reconciliation(
        &self,
        reserved_cutoff: DateTime<Utc>,
    ) -> Result<Vec<PendingVote>> {
        // Everything explicitly pending, plus reservations that have sat
        // untouched past the cutoff (requests that died before recording an
        // outcome).
        let filter = doc! {
            "$or": [
                { "state": PendingReconciliation },
                {
                    "state": Reserved,
                    "updated_at": { "$lte": BsonDateTime::from_chrono(reserved_cutoff) },
                },
            ],
        };
        let statuses: Vec<AnyVoteStatus> =
            self.statuses.find(filter, None).await?.try_collect().await?;

        let pending = statuses
            .into_iter()
            .filter_map(|status| match status {
                AnyVoteStatus::Reserved(s) => Some(PendingVote {
                    election_id: s.election_id,
                    voter_id: s.voter_id,
                    token: s.token,
                    since: s.updated_at,
                }),
                AnyVoteStatus::Pending(s) => Some(PendingVote {
                    election_id: s.election_id,
                    voter_id: s.voter_id,
                    token: s.token,
                    since: s.updated_at,
                }),
                // The filter excludes these, but be explicit.
                AnyVoteStatus::Committed(_) | AnyVoteStatus::Released(_) => None,
            })
            .collect();

        Ok(pending)
    }
}
