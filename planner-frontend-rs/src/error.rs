use tether::StoreError;

use crate::fixtures::FixtureError;

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("Nothing to undo!")]
    NothingToUndo,

    #[error("Invalid schema for {dataset}: {reason}")]
    ImportSchemaInvalid { dataset: String, reason: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("No item with id {id} in {dataset}")]
    ItemNotFound { dataset: String, id: String },

    #[error("{dataset} does not hold a list of items")]
    NotAList { dataset: String },

    #[error(transparent)]
    Fixture(#[from] FixtureError),

    #[error(transparent)]
    Sync(#[from] StoreError),
}
