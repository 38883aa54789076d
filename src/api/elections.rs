use mongodb::bson::doc;
use rocket::{futures::TryStreamExt, serde::json::Json, Route};

use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::{AuthToken, Voter},
        election::{ElectionDescription, ElectionSummary},
    },
    common::election::{ElectionId, ElectionState},
    db::election::Election,
    mongodb::Coll,
};

pub fn routes() -> Vec<Route> {
    routes![elections, election]
}

#[get("/elections")]
async fn elections(
    _token: AuthToken<Voter>,
    elections: Coll<Election>,
) -> Result<Json<Vec<ElectionSummary>>> {
    let filter = doc! {
        "state": ElectionState::Published,
    };
    let elections: Vec<Election> = elections.find(filter, None).await?.try_collect().await?;
    Ok(Json(elections.into_iter().map(Into::into).collect()))
}

#[get("/elections/<election_id>")]
async fn election(
    _token: AuthToken<Voter>,
    election_id: ElectionId,
    elections: Coll<Election>,
) -> Result<Json<ElectionDescription>> {
    let filter = doc! {
        "_id": election_id,
        "$or": [{"state": ElectionState::Published}, {"state": ElectionState::Archived}],
    };
    let election = elections
        .find_one(filter, None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election with ID '{election_id}'")))?;
    Ok(Json(election.into()))
}
