use crate::conflict::resolution::{Resolution, Resolved};
use crate::data_store::mapped_item::MappedItem;
use crate::status::Status;
use crate::value::Record;

/// Keep the in-memory item, re-marking it dirty when it differs from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepInMemoryAction {
    pub in_memory: MappedItem,
    pub in_db: Option<Record>,
    /// Whether the kept content differs in substance from the database row.
    pub set_uncommitted: bool,
}

impl KeepInMemoryAction {
    pub fn new(resolved: Resolved) -> Self {
        let set_uncommitted = !resolved.in_memory.equal_ignoring_ids(resolved.in_db.as_ref());
        Self {
            in_memory: resolved.in_memory,
            in_db: resolved.in_db,
            set_uncommitted,
        }
    }

    /// Returns the item, synchronized with the row it was kept against.
    ///
    /// A dirty item kept against a row takes the row's content as backup, so
    /// rolling back afterwards lands on what the database holds.
    ///
    /// When the row is gone and the item is live, the item loses its database
    /// id and goes back to `ToAdd` so the next commit inserts it again.
    pub fn apply(self) -> MappedItem {
        let mut item = self.in_memory;
        if self.set_uncommitted && item.is_committed() {
            item.set_status(Status::ToUpdate);
        }
        match &self.in_db {
            Some(row) => {
                item.bind_row(row);
                if item.removed() || item.status() == Status::ToUpdate {
                    item.backup_row(row);
                }
            }
            None => {
                item.unbind_row();
                if !item.removed() {
                    item.discard_backup();
                    item.set_status(Status::ToAdd);
                }
            }
        }
        item
    }
}

/// Overwrite the in-memory item from the database row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInMemoryAction {
    pub in_memory: MappedItem,
    pub in_db: Option<Record>,
}

impl UpdateInMemoryAction {
    pub fn new(resolved: Resolved) -> Self {
        Self {
            in_memory: resolved.in_memory,
            in_db: resolved.in_db,
        }
    }

    /// Returns the overwritten item, now committed, or `None` when the row no
    /// longer exists and the item has to be dropped.
    pub fn apply(self) -> Option<MappedItem> {
        let row = self.in_db?;
        let mut item = self.in_memory;
        if item.removed() {
            item.restore();
        }
        item.adopt_row(&row);
        item.discard_backup();
        item.set_status(Status::Committed);
        Some(item)
    }
}

/// Undo a local removal because the database shows the item exists again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResurrectAction {
    pub in_memory: MappedItem,
    pub in_db: Option<Record>,
}

impl ResurrectAction {
    pub fn new(resolved: Resolved) -> Self {
        Self {
            in_memory: resolved.in_memory,
            in_db: resolved.in_db,
        }
    }

    /// Returns the resurrected item, or `None` when there is no row to resurrect from.
    ///
    /// The item adopts every field the row carries. It ends up `Committed` if
    /// its content then matches the row and `ToUpdate` otherwise.
    pub fn apply(self) -> Option<MappedItem> {
        let row = self.in_db?;
        let mut item = self.in_memory;
        item.restore();
        item.adopt_row(&row);
        if item.equal_ignoring_ids(Some(&row)) {
            item.discard_backup();
            item.set_status(Status::Committed);
        } else {
            item.set_status(Status::ToUpdate);
        }
        Some(item)
    }
}

/// A state transition derived from a resolved conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    KeepInMemory(KeepInMemoryAction),
    UpdateInMemory(UpdateInMemoryAction),
    Resurrect(ResurrectAction),
}

impl Action {
    pub fn in_memory(&self) -> &MappedItem {
        match self {
            Action::KeepInMemory(action) => &action.in_memory,
            Action::UpdateInMemory(action) => &action.in_memory,
            Action::Resurrect(action) => &action.in_memory,
        }
    }

    /// Applies the action. `None` means the item no longer exists anywhere.
    pub fn apply(self) -> Option<MappedItem> {
        match self {
            Action::KeepInMemory(action) => Some(action.apply()),
            Action::UpdateInMemory(action) => action.apply(),
            Action::Resurrect(action) => action.apply(),
        }
    }
}

/// Maps each resolved conflict to the action its resolution calls for.
pub fn resolved_conflict_actions<I>(conflicts: I) -> impl Iterator<Item = Action>
where
    I: IntoIterator<Item = Resolved>,
{
    conflicts
        .into_iter()
        .map(|resolved| match resolved.resolution {
            Resolution::UseInMemory => Action::KeepInMemory(KeepInMemoryAction::new(resolved)),
            Resolution::UseInDb => Action::UpdateInMemory(UpdateInMemoryAction::new(resolved)),
        })
}

/// Conflicts resolved in favour of the database whose in-memory item is removed.
pub fn resurrection_conflicts_from_resolved(conflicts: &[Resolved]) -> Vec<&Resolved> {
    conflicts
        .iter()
        .filter(|resolved| resolved.is_resurrection())
        .collect()
}

/// Makes sure items kept in memory will be written on the next commit.
///
/// A removed item is set to `ToRemove` whatever its previous removal state.
/// A live item whose plain mapping differs from the row, identity fields
/// included, is set to `ToUpdate`. Conflicts resolved in favour of the
/// database are left alone.
pub fn make_changed_in_memory_items_dirty(conflicts: &mut [Resolved]) {
    for resolved in conflicts
        .iter_mut()
        .filter(|resolved| resolved.resolution == Resolution::UseInMemory)
    {
        if resolved.in_memory.removed() {
            resolved.in_memory.set_status(Status::ToRemove);
        } else if resolved.in_db.as_ref() != Some(&resolved.in_memory.asdict_()) {
            resolved.in_memory.set_status(Status::ToUpdate);
        }
    }
}
