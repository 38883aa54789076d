use std::sync::Arc;

use rocket::{serde::json::Json, Route, State};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::LedgerClient;
use crate::model::{
    api::{
        auth::{AuthToken, Voter},
        vote::{CastVoteResponse, VoteRequest, VoteStatusResponse},
    },
    common::election::ElectionId,
    db::{election::Election, eligibility::EligibilityRecord, vote_status::{AnyVoteStatus, DbVoteStatusStore}},
    mongodb::Coll,
};
use crate::voting::{
    gate::{DbEligibilityGate, DenialReason},
    status::VoteStatusStore,
    token::TokenHasher,
    CastOutcome, VoteCoordinator,
};

pub fn routes() -> Vec<Route> {
    routes![cast_vote, vote_status]
}

#[post("/elections/<election_id>/votes", data = "<request>", format = "json")]
async fn cast_vote(
    token: AuthToken<Voter>,
    election_id: ElectionId,
    request: Json<VoteRequest>,
    elections: Coll<Election>,
    eligibility: Coll<EligibilityRecord>,
    statuses: Coll<AnyVoteStatus>,
    ledger: &State<Arc<dyn LedgerClient>>,
    config: &State<Config>,
) -> Result<Json<CastVoteResponse>> {
    let coordinator = VoteCoordinator::new(
        DbEligibilityGate::new(elections, eligibility),
        DbVoteStatusStore::new(statuses),
        ledger.inner().clone(),
        TokenHasher::new(config),
    );

    let candidate_id = request.candidate_id;
    let outcome = coordinator
        .cast_vote(token.voter_id(), election_id, candidate_id)
        .await?;

    match outcome {
        CastOutcome::Committed { receipt, token } => Ok(Json(CastVoteResponse {
            election_id,
            candidate_id,
            receipt,
            token,
        })),
        CastOutcome::Denied(DenialReason::ElectionClosed) => Err(Error::forbidden(format!(
            "Election {election_id} is not open for voting"
        ))),
        CastOutcome::Denied(DenialReason::UnknownCandidate) => Err(Error::not_found(format!(
            "Candidate '{candidate_id}' in election '{election_id}'"
        ))),
        CastOutcome::Denied(DenialReason::NotEligible) => Err(Error::forbidden(format!(
            "Not eligible to vote in election {election_id}"
        ))),
        CastOutcome::AlreadyVoted => Err(Error::conflict(format!(
            "A vote has already been cast in election {election_id}"
        ))),
        CastOutcome::Rejected(reason) => Err(Error::ledger_rejected(reason)),
        CastOutcome::Pending => Err(Error::pending_retry(
            "The ledger outcome is not yet known; the vote is being reconciled",
        )),
    }
}

#[get("/elections/<election_id>/votes/status")]
async fn vote_status(
    token: AuthToken<Voter>,
    election_id: ElectionId,
    statuses: Coll<AnyVoteStatus>,
) -> Result<Json<VoteStatusResponse>> {
    let store = DbVoteStatusStore::new(statuses);
    let status = store.status(election_id, token.voter_id()).await?;
    Ok(Json(status.into()))
}
