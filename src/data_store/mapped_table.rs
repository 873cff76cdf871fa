use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use std::collections::BTreeMap;

use crate::data_store::item_id::{DbId, IdMap, ItemId};
use crate::data_store::mapped_item::MappedItem;
use crate::item_type::ItemType;
use crate::value::{Record, Value};

/// Values of one unique key, tagged with the key's position in
/// [`ItemType::unique_keys`].
pub type UniqueKey = (usize, Vec<Value>);

/// All mapped items of one [`ItemType`].
///
/// Items are kept in an arena keyed by [`ItemId`]. The table maintains two
/// indexes on top of it: the [`IdMap`] between item ids and database ids, and
/// a unique-key index over items that are not removed. Both are updated on
/// [`insert`](Self::insert) and [`take`](Self::take) only, so code that needs
/// to change an indexed property takes the item out, changes it and inserts
/// it back.
#[derive(Debug)]
pub struct MappedTable {
    item_type: ItemType,
    items: BTreeMap<ItemId, MappedItem>,
    id_map: IdMap,
    unique_index: HashMap<UniqueKey, ItemId>,
}

impl MappedTable {
    pub fn new(item_type: ItemType) -> Self {
        Self {
            item_type,
            items: BTreeMap::new(),
            id_map: IdMap::new(),
            unique_index: HashMap::new(),
        }
    }

    pub fn item_type(&self) -> ItemType {
        self.item_type
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: ItemId) -> Option<&MappedItem> {
        self.items.get(&id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    /// Iterates over every item, removed ones included, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &MappedItem> {
        self.items.values()
    }

    pub fn ids(&self) -> Vec<ItemId> {
        self.items.keys().copied().collect()
    }

    /// Puts `item` into the table and indexes it.
    ///
    /// An item already stored under the same id is replaced.
    pub fn insert(&mut self, item: MappedItem) {
        let id = item.id();
        self.take(id);
        if let Some(db_id) = item.db_id() {
            self.id_map.set_db_id(id, db_id);
        }
        if !item.removed() {
            for key in unique_keys_of(self.item_type, item.content()) {
                self.unique_index.insert(key, id);
            }
        }
        self.items.insert(id, item);
    }

    /// Removes the item from the table and from every index.
    pub fn take(&mut self, id: ItemId) -> Option<MappedItem> {
        let item = self.items.remove(&id)?;
        self.id_map.remove_item_id(id);
        if !item.removed() {
            for key in unique_keys_of(self.item_type, item.content()) {
                if self.unique_index.get(&key) == Some(&id) {
                    self.unique_index.remove(&key);
                }
            }
        }
        Some(item)
    }

    pub fn item_id_for_db_id(&self, db_id: DbId) -> Option<ItemId> {
        self.id_map.item_id(db_id)
    }

    /// Item ids of every item currently bound to a database row.
    pub fn db_bound_ids(&self) -> Vec<(DbId, ItemId)> {
        let mut bound: Vec<(DbId, ItemId)> = self.id_map.db_ids().collect();
        bound.sort();
        bound
    }

    /// Finds a live item with the same value for any unique key of `record`.
    pub fn find_live_by_unique(&self, record: &Record) -> Option<ItemId> {
        unique_keys_of(self.item_type, record)
            .into_iter()
            .find_map(|key| self.unique_index.get(&key).copied())
    }

    /// Finds a removed item that shares a unique key with `record`.
    pub fn find_removed_by_unique(&self, record: &Record) -> Option<ItemId> {
        let keys = unique_keys_of(self.item_type, record);
        self.items
            .values()
            .filter(|item| item.removed())
            .find(|item| {
                unique_keys_of(self.item_type, item.content())
                    .iter()
                    .any(|key| keys.contains(key))
            })
            .map(MappedItem::id)
    }

    /// Finds a live item by the values of the first unique key.
    pub fn find_by_key(&self, values: &[Value]) -> Option<&MappedItem> {
        let id = self.unique_index.get(&(0, values.to_vec()))?;
        self.items.get(id)
    }

    /// Returns a live item other than `exclude` that already holds a unique
    /// key of `record`, together with a description of the key.
    pub fn unique_collision(&self, record: &Record, exclude: Option<ItemId>) -> Option<String> {
        unique_keys_of(self.item_type, record)
            .into_iter()
            .find(|key| {
                self.unique_index
                    .get(key)
                    .is_some_and(|holder| Some(*holder) != exclude)
            })
            .map(|(index, values)| describe_key(self.item_type.unique_keys()[index], &values))
    }

    /// Describes the first unique key held by more than one live item.
    pub fn shared_unique_key(&self) -> Option<String> {
        let mut seen: HashSet<UniqueKey> = HashSet::new();
        self.items
            .values()
            .filter(|item| !item.removed())
            .flat_map(|item| unique_keys_of(self.item_type, item.content()))
            .find(|key| !seen.insert(key.clone()))
            .map(|(index, values)| describe_key(self.item_type.unique_keys()[index], &values))
    }
}

/// Unique keys of `record` for `item_type`. Keys with null parts are skipped.
pub fn unique_keys_of(item_type: ItemType, record: &Record) -> Vec<UniqueKey> {
    item_type
        .unique_keys()
        .iter()
        .enumerate()
        .filter_map(|(index, fields)| {
            let values: Option<Vec<Value>> = fields
                .iter()
                .map(|field| record.get(*field).filter(|v| !v.is_null()).cloned())
                .collect();
            values.map(|values| (index, values))
        })
        .collect()
}

fn describe_key(fields: &[&str], values: &[Value]) -> String {
    fields
        .iter()
        .zip(values)
        .map(|(field, value)| format!("{field} {value}"))
        .collect::<Vec<_>>()
        .join(", ")
}
