use chrono::Utc;
use rocket::{serde::json::Json, Route, State};

use crate::config::Config;
use crate::error::Result;
use crate::model::{
    api::{
        auth::{Admin, AuthToken},
        vote::PendingVoteDescription,
    },
    db::vote_status::{AnyVoteStatus, DbVoteStatusStore},
    mongodb::Coll,
};
use crate::voting::{
    reconciler::{ReconcileSummary, VoteReconciler},
    status::VoteStatusStore,
};

pub fn routes() -> Vec<Route> {
    routes![pending_votes, run_reconciliation]
}

#[get("/admin/reconciliation")]
async fn pending_votes(
    _token: AuthToken<Admin>,
    statuses: Coll<AnyVoteStatus>,
    config: &State<Config>,
) -> Result<Json<Vec<PendingVoteDescription>>> {
    let store = DbVoteStatusStore::new(statuses);
    let cutoff = Utc::now() - config.reconcile_grace();
    let pending = store.needs_reconciliation(cutoff).await?;
    Ok(Json(pending.into_iter().map(Into::into).collect()))
}

#[post("/admin/reconciliation/run")]
async fn run_reconciliation(
    _token: AuthToken<Admin>,
    reconciler: &State<VoteReconciler<DbVoteStatusStore>>,
) -> Result<Json<ReconcileSummary>> {
    let summary = reconciler.run_now().await?;
    Ok(Json(summary))
}
