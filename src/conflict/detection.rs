use std::collections::VecDeque;

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use log::trace;
use serde::{Deserialize, Serialize};

use crate::data_store::item_id::{DbId, ItemId};
use crate::data_store::mapped_item::{row_db_id, MappedItem};
use crate::data_store::mapped_table::MappedTable;
use crate::status::Status;
use crate::value::Record;

/// Represents the kind of divergence between an item and its database row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictType {
    /// The item was updated locally and its row was changed by someone else.
    UpdateUpdate,
    /// The item was updated locally and its row was deleted by someone else.
    UpdateDelete,
    /// The item was removed locally and its row was changed or re-created by someone else.
    RemoveUpdate,
}

/// Decides whether `in_memory` conflicts with the current database row.
///
/// Only items with a pending update or removal can conflict, and only when
/// the row differs from the one the item was last synchronized with. A row
/// that vanished while the item is scheduled for removal is not a conflict:
/// both sides agree the item is gone.
pub fn conflict_type(in_memory: &MappedItem, in_db: Option<&Record>) -> Option<ConflictType> {
    let changed = |row: &Record| in_memory.synced() != Some(row);
    match (in_memory.status(), in_db) {
        (Status::ToAdd | Status::Committed, _) => None,
        (Status::ToUpdate, None) => Some(ConflictType::UpdateDelete),
        (Status::ToUpdate, Some(row)) if changed(row) => Some(ConflictType::UpdateUpdate),
        (Status::ToRemove | Status::AddedAndRemoved, Some(row)) if changed(row) => {
            Some(ConflictType::RemoveUpdate)
        }
        _ => None,
    }
}

/// What a fetch does with one row or one previously known item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The row is not known yet and becomes a new committed item.
    New(Record),
    /// A committed item whose row changed; it is overwritten silently.
    Refresh { id: ItemId, row: Record },
    /// Nothing to do for this item.
    Unchanged(ItemId),
    /// A pending addition that someone else committed first; the item takes
    /// over the row's database id.
    AdoptDbId { id: ItemId, row: Record },
    /// A pending item that diverged from the database.
    Conflict {
        id: ItemId,
        in_db: Option<Record>,
        conflict_type: ConflictType,
    },
    /// The item's row is gone and the item has nothing left to write.
    Vanished(ItemId),
}

/// Classification of a full table fetch against the mapped table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchPlan {
    pub dispositions: Vec<Disposition>,
}

impl FetchPlan {
    pub fn conflict_count(&self) -> usize {
        self.dispositions
            .iter()
            .filter(|d| matches!(d, Disposition::Conflict { .. }))
            .count()
    }

    pub fn is_quiet(&self) -> bool {
        self.dispositions
            .iter()
            .all(|d| matches!(d, Disposition::Unchanged(_)))
    }
}

/// Classifies every fetched row of a table against the items already mapped.
///
/// Rows must be complete (one per database row of the table) and already in
/// item-id space. A row is matched to an item by database id first, and
/// failing that by unique key, looking at live items before removed ones. A
/// unique-key match is only accepted for items that have no database id or
/// whose row is absent from the fetch, so a logical item that was deleted and
/// re-created elsewhere is recognized as the same item.
///
/// One exception: when a row's unique key is held by a locally updated item
/// whose own row is still there, the item is paired with the row holding its
/// key and its own row becomes a new item. Two live items never end up
/// sharing a unique key.
///
/// Items bound to a database id that no row carries any more are reported
/// last.
pub fn plan_fetch(table: &MappedTable, rows: Vec<Record>) -> FetchPlan {
    let fetched_db_ids: HashSet<DbId> = rows.iter().filter_map(row_db_id).collect();
    let unbound_or_vanished = |item: &MappedItem| {
        item.db_id().is_none_or(|db_id| !fetched_db_ids.contains(&db_id))
    };

    let mut assignment: Vec<Option<ItemId>> = rows
        .iter()
        .map(|row| row_db_id(row).and_then(|db_id| table.item_id_for_db_id(db_id)))
        .collect();
    let mut row_of: HashMap<ItemId, usize> = assignment
        .iter()
        .enumerate()
        .filter_map(|(index, id)| id.map(|id| (id, index)))
        .collect();
    let mut by_unique: HashSet<ItemId> = HashSet::new();
    let mut pending: VecDeque<usize> = (0..rows.len()).filter(|&i| assignment[i].is_none()).collect();

    while let Some(index) = pending.pop_front() {
        let row = &rows[index];
        let live = table
            .find_live_by_unique(row)
            .filter(|id| !by_unique.contains(id))
            .and_then(|id| table.get(id));
        let matched = match live {
            Some(item) => match row_of.get(&item.id()) {
                None if unbound_or_vanished(item) => Some(item.id()),
                Some(&own) if item.status() == Status::ToUpdate => {
                    trace!("{} {} moves to the row holding its unique key", item.item_type(), item.id());
                    assignment[own] = None;
                    pending.push_back(own);
                    Some(item.id())
                }
                _ => None,
            },
            None => None,
        };
        let matched = matched.or_else(|| {
            table
                .find_removed_by_unique(row)
                .filter(|id| !row_of.contains_key(id) && !by_unique.contains(id))
                .filter(|id| table.get(*id).is_some_and(|item| unbound_or_vanished(item)))
        });
        if let Some(id) = matched {
            assignment[index] = Some(id);
            row_of.insert(id, index);
            by_unique.insert(id);
        }
    }

    let mut plan = FetchPlan::default();
    for (row, id) in rows.into_iter().zip(assignment) {
        match id.and_then(|id| table.get(id)) {
            Some(item) => plan.dispositions.push(disposition_for(item, row)),
            None => plan.dispositions.push(Disposition::New(row)),
        }
    }

    for (db_id, id) in table.db_bound_ids() {
        if fetched_db_ids.contains(&db_id) || row_of.contains_key(&id) {
            continue;
        }
        let Some(item) = table.get(id) else {
            continue;
        };
        let disposition = match conflict_type(item, None) {
            Some(conflict_type) => Disposition::Conflict {
                id,
                in_db: None,
                conflict_type,
            },
            None if item.status() == Status::ToAdd => Disposition::Unchanged(id),
            None => Disposition::Vanished(id),
        };
        plan.dispositions.push(disposition);
    }
    plan
}

fn disposition_for(item: &MappedItem, row: Record) -> Disposition {
    let id = item.id();
    match item.status() {
        Status::Committed if item.synced() != Some(&row) => Disposition::Refresh { id, row },
        Status::Committed => Disposition::Unchanged(id),
        Status::ToAdd => Disposition::AdoptDbId { id, row },
        _ => match conflict_type(item, Some(&row)) {
            Some(conflict_type) => Disposition::Conflict {
                id,
                in_db: Some(row),
                conflict_type,
            },
            None => Disposition::Unchanged(id),
        },
    }
}
