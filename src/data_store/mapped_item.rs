use serde::{Deserialize, Serialize};

use crate::data_store::item_id::{CommitId, DbId, ItemId};
use crate::item_type::ItemType;
use crate::status::Status;
use crate::value::{Record, Value};

/// Name of the primary key column in plain-mapping rows.
pub const ID_FIELD: &str = "id";
/// Name of the commit stamp column in plain-mapping rows.
pub const COMMIT_ID_FIELD: &str = "commit_id";

const NULL: Value = Value::Null;

/// An in-memory item mirroring (eventually) a row of the database.
///
/// The item owns its content and its lifecycle [`Status`]. Whether it is
/// removed is derived from the status and never stored separately.
///
/// Besides the content, the item remembers the last database row it was
/// synchronized with (`synced`). Conflict detection compares a freshly fetched
/// row against that snapshot to find out whether the database changed behind
/// the item's back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedItem {
    id: ItemId,
    item_type: ItemType,
    db_id: Option<DbId>,
    commit_id: Option<CommitId>,
    status: Status,
    content: Record,
    synced: Option<Record>,
    backup: Option<Record>,
    status_when_removed: Option<Status>,
    removal_source: Option<(ItemType, ItemId)>,
}

impl MappedItem {
    /// Creates an item that exists only in memory.
    pub fn new(id: ItemId, item_type: ItemType, content: Record) -> Self {
        Self {
            id,
            item_type,
            db_id: None,
            commit_id: None,
            status: Status::ToAdd,
            content,
            synced: None,
            backup: None,
            status_when_removed: None,
            removal_source: None,
        }
    }

    /// Creates a committed item from a database row.
    ///
    /// The row must already be in item-id space, i.e. its reference fields
    /// hold [`Value::Ref`]s.
    pub fn from_db(id: ItemId, item_type: ItemType, row: Record) -> Self {
        let content = content_of(item_type, &row);
        let mut item = Self::new(id, item_type, content);
        item.status = Status::Committed;
        item.bind_row(&row);
        item
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn item_type(&self) -> ItemType {
        self.item_type
    }

    pub fn db_id(&self) -> Option<DbId> {
        self.db_id
    }

    pub fn commit_id(&self) -> Option<CommitId> {
        self.commit_id
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    pub fn removed(&self) -> bool {
        self.status.is_removed()
    }

    pub fn is_committed(&self) -> bool {
        self.status.is_committed()
    }

    pub fn is_dirty(&self) -> bool {
        !self.status.is_committed()
    }

    pub fn content(&self) -> &Record {
        &self.content
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.content.get(field)
    }

    /// The database row this item was last synchronized with.
    pub fn synced(&self) -> Option<&Record> {
        self.synced.as_ref()
    }

    /// Committed content saved by the first update since the last commit.
    pub fn backup(&self) -> Option<&Record> {
        self.backup.as_ref()
    }

    pub fn status_when_removed(&self) -> Option<Status> {
        self.status_when_removed
    }

    /// The item whose removal cascaded to this one, if any.
    pub fn removal_source(&self) -> Option<(ItemType, ItemId)> {
        self.removal_source
    }

    /// Snapshot of the item as a plain mapping, identity fields included.
    pub fn asdict_(&self) -> Record {
        let mut dict = self.content.clone();
        dict.insert(
            ID_FIELD.to_string(),
            self.db_id.map_or(Value::Null, |id| Value::Integer(id.get())),
        );
        dict.insert(
            COMMIT_ID_FIELD.to_string(),
            self.commit_id
                .map_or(Value::Null, |id| Value::Integer(id.get())),
        );
        dict
    }

    /// Compares content fields with `other`, leaving out `id` and `commit_id`.
    ///
    /// A field missing on either side compares as null. A missing row is
    /// never equal.
    pub fn equal_ignoring_ids(&self, other: Option<&Record>) -> bool {
        let Some(other) = other else {
            return false;
        };
        self.item_type.fields().iter().all(|field| {
            self.content.get(*field).unwrap_or(&NULL) == other.get(*field).unwrap_or(&NULL)
        })
    }

    /// Iterates over the items this item references.
    pub fn referenced_items(&self) -> impl Iterator<Item = (ItemType, ItemId)> + '_ {
        self.item_type
            .references()
            .iter()
            .filter_map(|(field, item_type)| {
                self.content
                    .get(*field)
                    .and_then(Value::as_ref_id)
                    .map(|id| (*item_type, id))
            })
    }

    pub fn references_item(&self, item_type: ItemType, id: ItemId) -> bool {
        self.referenced_items().any(|r| r == (item_type, id))
    }

    /// Merges `changes` into the content.
    ///
    /// The first change to a committed item saves a backup and moves it to
    /// `ToUpdate`; a change that brings the content back to the backup moves
    /// it back to `Committed`. Returns `false` when nothing changed.
    pub fn apply_changes(&mut self, changes: &Record) -> bool {
        let changed = changes
            .iter()
            .any(|(field, value)| self.content.get(field).unwrap_or(&NULL) != value);
        if !changed {
            return false;
        }
        if self.status == Status::Committed {
            self.backup = Some(self.content.clone());
            self.status = Status::ToUpdate;
        }
        for (field, value) in changes {
            self.content.insert(field.clone(), value.clone());
        }
        if self.status == Status::ToUpdate && self.backup.as_ref() == Some(&self.content) {
            self.status = Status::Committed;
            self.backup = None;
        }
        true
    }

    /// Marks the item removed. Returns `false` if it already was.
    pub fn mark_removed(&mut self, source: Option<(ItemType, ItemId)>) -> bool {
        if self.removed() {
            return false;
        }
        self.status_when_removed = Some(self.status);
        self.removal_source = source;
        self.status = match self.status {
            Status::ToAdd => Status::AddedAndRemoved,
            _ => Status::ToRemove,
        };
        true
    }

    /// Brings a removed item back to the status it had before removal.
    /// Returns `false` if the item was not removed.
    pub fn restore(&mut self) -> bool {
        if !self.removed() {
            return false;
        }
        self.status = self.status_when_removed.take().unwrap_or(match self.status {
            Status::AddedAndRemoved => Status::ToAdd,
            _ => Status::Committed,
        });
        self.removal_source = None;
        true
    }

    /// Takes every content field present in `row` and binds the item to it.
    pub fn adopt_row(&mut self, row: &Record) {
        for field in self.item_type.fields() {
            if let Some(value) = row.get(*field) {
                self.content.insert(field.to_string(), value.clone());
            }
        }
        self.bind_row(row);
    }

    /// Records `row` as the synchronization point and takes over its identity.
    pub fn bind_row(&mut self, row: &Record) {
        self.db_id = row_db_id(row);
        self.commit_id = row
            .get(COMMIT_ID_FIELD)
            .and_then(Value::as_integer)
            .map(CommitId::new);
        self.synced = Some(row.clone());
    }

    /// Takes over the identity of a row that matches this pending addition.
    ///
    /// The item becomes `Committed` when its content equals the row, and
    /// `ToUpdate` otherwise, with the row's content as backup.
    pub fn adopt_db_identity(&mut self, row: &Record) {
        self.bind_row(row);
        if self.equal_ignoring_ids(Some(row)) {
            self.status = Status::Committed;
            self.backup = None;
        } else {
            self.status = Status::ToUpdate;
            self.backup_row(row);
        }
    }

    /// Makes the content of `row` what a rollback reverts to.
    pub fn backup_row(&mut self, row: &Record) {
        self.backup = Some(content_of(self.item_type, row));
    }

    /// Forgets the database row, e.g. after it was deleted by someone else.
    pub fn unbind_row(&mut self) {
        self.db_id = None;
        self.commit_id = None;
        self.synced = None;
    }

    pub fn discard_backup(&mut self) {
        self.backup = None;
    }

    /// Marks the item as written by commit `commit_id` under `db_id`.
    pub fn mark_committed(&mut self, db_id: DbId, commit_id: CommitId) {
        self.db_id = Some(db_id);
        self.commit_id = Some(commit_id);
        self.status = Status::Committed;
        self.backup = None;
        self.status_when_removed = None;
        self.removal_source = None;
        self.synced = Some(self.asdict_());
    }

    /// Drops local changes of an updated item. Returns `false` if there was no backup.
    pub fn revert_to_backup(&mut self) -> bool {
        let Some(backup) = self.backup.take() else {
            return false;
        };
        self.content = backup;
        self.status = Status::Committed;
        true
    }
}

/// Content fields of `row` for the given type; missing fields become null.
pub fn content_of(item_type: ItemType, row: &Record) -> Record {
    item_type
        .fields()
        .iter()
        .map(|field| (field.to_string(), row.get(*field).cloned().unwrap_or(Value::Null)))
        .collect()
}

/// Database id stored in the `id` field of a row.
pub fn row_db_id(row: &Record) -> Option<DbId> {
    row.get(ID_FIELD).and_then(Value::as_integer).map(DbId::new)
}
