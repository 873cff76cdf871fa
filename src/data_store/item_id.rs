use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable in-memory key of a mapped item.
///
/// Item ids are handed out by an [`IdFactory`] and never reused within a
/// mapping, so they stay valid across commits even though the database id of
/// the item may only become known later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(u64);

impl ItemId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Primary key assigned by the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DbId(i64);

impl DbId {
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for DbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a database commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitId(i64);

impl CommitId {
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic source of [`ItemId`]s.
#[derive(Debug)]
pub struct IdFactory {
    next_id: u64,
}

impl Default for IdFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl IdFactory {
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    pub fn next_id(&mut self) -> ItemId {
        let item_id = ItemId(self.next_id);
        self.next_id += 1;
        item_id
    }
}

/// Two-way mapping between item ids and database ids.
///
/// An item id may have no database id (item never persisted), but a database
/// id always maps to exactly one item id.
#[derive(Debug, Default)]
pub struct IdMap {
    item_id_by_db_id: HashMap<DbId, ItemId>,
    db_id_by_item_id: HashMap<ItemId, DbId>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `item_id` to `db_id`, dropping whatever either side was bound to before.
    pub fn set_db_id(&mut self, item_id: ItemId, db_id: DbId) {
        self.remove_item_id(item_id);
        if let Some(previous) = self.item_id_by_db_id.insert(db_id, item_id) {
            self.db_id_by_item_id.remove(&previous);
        }
        self.db_id_by_item_id.insert(item_id, db_id);
    }

    pub fn remove_item_id(&mut self, item_id: ItemId) -> Option<DbId> {
        let db_id = self.db_id_by_item_id.remove(&item_id)?;
        self.item_id_by_db_id.remove(&db_id);
        Some(db_id)
    }

    pub fn item_id(&self, db_id: DbId) -> Option<ItemId> {
        self.item_id_by_db_id.get(&db_id).copied()
    }

    pub fn db_id(&self, item_id: ItemId) -> Option<DbId> {
        self.db_id_by_item_id.get(&item_id).copied()
    }

    pub fn db_ids(&self) -> impl Iterator<Item = (DbId, ItemId)> + '_ {
        self.item_id_by_db_id.iter().map(|(db_id, item_id)| (*db_id, *item_id))
    }
}
