use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a mapped item relative to the database.
///
/// The set of states is closed. An item moves between them only through the
/// mapping's mutation calls (add, update, remove, restore, commit, rollback)
/// or through conflict resolution actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// **Committed:**
    ///
    /// The item agrees with the last database row it was synchronized with.
    Committed,
    /// **To add:**
    ///
    /// The item was created in memory and has never been written.
    ToAdd,
    /// **To update:**
    ///
    /// The item exists in the database and carries local changes.
    ToUpdate,
    /// **To remove:**
    ///
    /// The item exists in the database and is scheduled for deletion.
    ToRemove,
    /// **Added and removed:**
    ///
    /// The item was created in memory and removed before ever being written,
    /// so committing it produces no database write.
    AddedAndRemoved,
}

impl Status {
    /// Returns `true` for the two removal states.
    pub fn is_removed(self) -> bool {
        matches!(self, Status::ToRemove | Status::AddedAndRemoved)
    }

    pub fn is_committed(self) -> bool {
        self == Status::Committed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Committed => "committed",
            Status::ToAdd => "to_add",
            Status::ToUpdate => "to_update",
            Status::ToRemove => "to_remove",
            Status::AddedAndRemoved => "added_and_removed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
