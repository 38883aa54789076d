use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::model::{
    common::vote::VoteState,
    db::{
        election::Election,
        eligibility::EligibilityRecord,
        vote_status::{AnyVoteStatus, VoteStatus},
    },
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    ///
    /// Panics iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Coll::from_db(db))
    }
}

// Election collection
const ELECTIONS: &str = "elections";
impl MongoCollection for Election {
    const NAME: &'static str = ELECTIONS;
}

// Eligibility collection
const ELIGIBILITY: &str = "eligibility";
impl MongoCollection for EligibilityRecord {
    const NAME: &'static str = ELIGIBILITY;
}

// Vote status collection
const VOTE_STATUS: &str = "vote_status";
impl<S: VoteState> MongoCollection for VoteStatus<S> {
    const NAME: &'static str = VOTE_STATUS;
}
impl MongoCollection for AnyVoteStatus {
    const NAME: &'static str = VOTE_STATUS;
}

/// Ensure that all the required indexes exist on the given database.
///
/// The unique index on `(election_id, voter_id)` in the vote status
/// collection is what makes a reservation a single atomic conditional
/// write rather than a read-then-write pair.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Vote status collection.
    let status_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "voter_id": 1})
        .options(unique.clone())
        .build();
    Coll::<AnyVoteStatus>::from_db(db)
        .create_index(status_index, None)
        .await?;

    // Eligibility collection.
    let eligibility_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "voter_id": 1})
        .options(unique.clone())
        .build();
    Coll::<EligibilityRecord>::from_db(db)
        .create_index(eligibility_index, None)
        .await?;

    Ok(())
}
