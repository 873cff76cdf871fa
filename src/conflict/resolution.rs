use serde::{Deserialize, Serialize};

use crate::data_store::mapped_item::MappedItem;
use crate::value::Record;

/// Outcome chosen for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    /// Keep the local edit; the database's concurrent change is overwritten on the next commit.
    UseInMemory,
    /// Take the database's state; the local edit is discarded.
    UseInDb,
}

/// A locally mutated item paired with the current database row for the same
/// logical item.
///
/// The conflict owns the item for the duration of one resolution pass; the
/// mapping takes it out of its table when the conflict is detected and puts
/// it back once the resulting action has been applied. `in_db` is `None`
/// when the row was deleted concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub in_memory: MappedItem,
    pub in_db: Option<Record>,
}

impl Conflict {
    pub fn new(in_memory: MappedItem, in_db: Option<Record>) -> Self {
        Self { in_memory, in_db }
    }

    /// Pairs the conflict with a resolution. See [`resolved_from`].
    pub fn resolve(self, resolution: Resolution) -> Resolved {
        resolved_from(self, resolution)
    }
}

/// A conflict together with the resolution chosen for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub in_memory: MappedItem,
    pub in_db: Option<Record>,
    pub resolution: Resolution,
}

impl Resolved {
    /// Whether resolving this conflict undoes a local removal.
    pub fn is_resurrection(&self) -> bool {
        self.resolution == Resolution::UseInDb && self.in_memory.removed()
    }
}

/// Builds a [`Resolved`] from a conflict, moving both sides over unchanged.
pub fn resolved_from(conflict: Conflict, resolution: Resolution) -> Resolved {
    Resolved {
        in_memory: conflict.in_memory,
        in_db: conflict.in_db,
        resolution,
    }
}

/// Resolves every conflict in favour of the in-memory item.
pub fn select_in_memory_item_always(conflicts: Vec<Conflict>) -> Vec<Resolved> {
    conflicts
        .into_iter()
        .map(|conflict| resolved_from(conflict, Resolution::UseInMemory))
        .collect()
}

/// Resolves every conflict in favour of the database row.
pub fn select_in_db_item_always(conflicts: Vec<Conflict>) -> Vec<Resolved> {
    conflicts
        .into_iter()
        .map(|conflict| resolved_from(conflict, Resolution::UseInDb))
        .collect()
}

/// Decides how conflicts found during a fetch are resolved.
///
/// Implementations must return every input conflict exactly once, each paired
/// with one [`Resolution`] and with its `in_memory` and `in_db` untouched. The
/// mapping checks the first part of that contract and rejects the whole pass
/// when it is broken.
///
/// Any `FnMut(Vec<Conflict>) -> Vec<Resolved>` is a resolver, which covers the
/// two `select_*` functions and interactive choices alike:
///
/// ```
/// use spinedb::conflict::resolution::{select_in_db_item_always, ConflictResolver};
///
/// let mut resolver = select_in_db_item_always;
/// assert!(resolver.resolve(Vec::new()).is_empty());
/// ```
pub trait ConflictResolver {
    fn resolve(&mut self, conflicts: Vec<Conflict>) -> Vec<Resolved>;
}

impl<F> ConflictResolver for F
where
    F: FnMut(Vec<Conflict>) -> Vec<Resolved>,
{
    fn resolve(&mut self, conflicts: Vec<Conflict>) -> Vec<Resolved> {
        self(conflicts)
    }
}

/// Named resolution policy, selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// [`select_in_memory_item_always`].
    #[default]
    KeepInMemory,
    /// [`select_in_db_item_always`].
    UseInDb,
}

impl ConflictResolver for ConflictPolicy {
    fn resolve(&mut self, conflicts: Vec<Conflict>) -> Vec<Resolved> {
        match self {
            ConflictPolicy::KeepInMemory => select_in_memory_item_always(conflicts),
            ConflictPolicy::UseInDb => select_in_db_item_always(conflicts),
        }
    }
}
