use std::fmt::Debug;

use mongodb::bson::{to_bson, Bson};
use serde::{de::DeserializeOwned, Serialize};
use serde_unit_struct::{Deserialize_unit_struct, Serialize_unit_struct};

/// Trait for the vote status state markers. Each marker serialises as its
/// own name, so the same value works as a typestate parameter and as a BSON
/// filter value.
pub trait VoteState:
    Debug + Copy + Serialize + DeserializeOwned + Send + Sync + Unpin + 'static
{
}

/// Marker type for a held reservation: the vote is in flight.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Deserialize_unit_struct, Serialize_unit_struct)]
pub struct Reserved;

impl From<Reserved> for Bson {
    fn from(state: Reserved) -> Self {
        to_bson(&state).expect("Serialisation is infallible")
    }
}

impl VoteState for Reserved {}

/// Marker type for a reservation whose external outcome is unknown and must
/// be resolved against the ledger.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Deserialize_unit_struct, Serialize_unit_struct)]
pub struct PendingReconciliation;

impl From<PendingReconciliation> for Bson {
    fn from(state: PendingReconciliation) -> Self {
        to_bson(&state).expect("Serialisation is infallible")
    }
}

impl VoteState for PendingReconciliation {}

/// Marker type for a vote the ledger has accepted. Terminal.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Deserialize_unit_struct, Serialize_unit_struct)]
pub struct Committed;

impl From<Committed> for Bson {
    fn from(state: Committed) -> Self {
        to_bson(&state).expect("Serialisation is infallible")
    }
}

impl VoteState for Committed {}

/// Marker type for a rolled-back reservation. A released pair may be
/// reserved again.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Deserialize_unit_struct, Serialize_unit_struct)]
pub struct Released;

impl From<Released> for Bson {
    fn from(state: Released) -> Self {
        to_bson(&state).expect("Serialisation is infallible")
    }
}

impl VoteState for Released {}
