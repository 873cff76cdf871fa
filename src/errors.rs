use thiserror::Error;

use crate::data_store::item_id::{DbId, ItemId};
use crate::item_type::ItemType;

#[derive(Error, Debug)]
pub enum SpineDbError {
    #[error("unknown item type '{0}'")]
    UnknownItemType(String),

    #[error("no {item_type} with id {id}")]
    ItemNotFound { item_type: ItemType, id: ItemId },

    #[error("invalid status for {item_type} {id}: {message}")]
    InvalidStatus {
        item_type: ItemType,
        id: ItemId,
        message: String,
    },

    #[error("missing keyword argument '{field}' for '{item_type}'")]
    MissingField { item_type: ItemType, field: String },

    #[error("invalid keyword argument '{field}' for '{item_type}'")]
    InvalidField { item_type: ItemType, field: String },

    #[error("invalid {field} for {item_type}")]
    InvalidReference { item_type: ItemType, field: String },

    #[error("there's already a {item_type} with {key}")]
    UniqueViolation { item_type: ItemType, key: String },

    #[error("Commit message cannot be empty.")]
    EmptyCommitMessage,

    #[error("Nothing to commit.")]
    NothingToCommit,

    #[error("Nothing to rollback.")]
    NothingToRollback,

    #[error("Conflict resolver broke its contract: {0}")]
    ResolutionContract(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("{item_type} row {db_id} no longer exists in the database")]
    StaleRow { item_type: ItemType, db_id: DbId },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, SpineDbError>;
