use serde::{Deserialize, Serialize};

use crate::data_store::item_id::{CommitId, DbId};
use crate::errors::Result;
use crate::item_type::ItemType;
use crate::value::Record;

/// Metadata recorded with every commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub comment: String,
    pub user: String,
}

impl CommitInfo {
    pub fn new(comment: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            comment: comment.into(),
            user: user.into(),
        }
    }
}

/// Represents a single row change to be applied to the storage layer.
///
/// Rows are in database-id space: the `id` field carries the row's primary
/// key and reference fields carry the primary keys of the referenced rows.
/// The storage stamps `commit_id` itself.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageMutation {
    /// Insert a new row. Its `id` must come from [`Storage::reserve_ids`].
    Insert { item_type: ItemType, row: Record },
    /// Replace an existing row. Fails with `StaleRow` if the row is gone.
    Update { item_type: ItemType, row: Record },
    /// Delete a row. Deleting a missing row is a no-op.
    Delete { item_type: ItemType, db_id: DbId },
}

impl StorageMutation {
    pub fn item_type(&self) -> ItemType {
        match self {
            StorageMutation::Insert { item_type, .. }
            | StorageMutation::Update { item_type, .. }
            | StorageMutation::Delete { item_type, .. } => *item_type,
        }
    }
}

/// Trait for interacting with the database that backs a mapping.
///
/// Several mappings may share one storage, each standing for a separate
/// session; implementations must therefore be `Send` and `Sync`, and each
/// call must be atomic with respect to the others.
pub trait Storage: Send + Sync {
    /// Returns every row of the table, ordered by id.
    fn fetch(&self, item_type: ItemType) -> Result<Vec<Record>>;

    /// Reserves `count` fresh primary keys for new rows of the table.
    fn reserve_ids(&self, item_type: ItemType, count: usize) -> Result<Vec<DbId>>;

    /// Atomically applies the given mutations as one commit.
    ///
    /// Either every mutation is persisted, stamped with the returned
    /// [`CommitId`], or none is.
    ///
    /// # Errors
    ///
    /// Returns `SpineDbError::StaleRow` when an update targets a row that no
    /// longer exists, and `SpineDbError::StorageError` when the backend fails.
    fn apply_mutations(
        &self,
        commit: CommitInfo,
        mutations: Vec<StorageMutation>,
    ) -> Result<CommitId>;

    /// Number of commits recorded so far.
    fn commit_count(&self) -> Result<u64>;
}
