//! A [`Storage`] persisted in RocksDB.
//!
//! Rows live under `"{item_type}/{db_id:020}"` keys as bincode-encoded
//! records, so a forward scan from `"{item_type}/"` yields a table ordered by
//! id. Counters and commit metadata live under keys starting with `__`.

use log::debug;
use parking_lot::Mutex;
use rocksdb::{Direction, IteratorMode, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::data_store::item_id::{CommitId, DbId};
use crate::data_store::mapped_item::{row_db_id, COMMIT_ID_FIELD};
use crate::errors::{Result, SpineDbError};
use crate::item_type::ItemType;
use crate::storage::{CommitInfo, Storage, StorageMutation};
use crate::value::{Record, Value};

const KEY_COMMIT_COUNT: &str = "__commit_count";

pub struct RocksStorage {
    db: DB,
    // Serializes read-validate-write sequences.
    write_lock: Mutex<()>,
}

impl RocksStorage {
    /// Opens (or creates) a database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = DB::open_default(path).map_err(storage_error)?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    pub fn commit(&self, commit_id: CommitId) -> Result<Option<CommitInfo>> {
        self.get(&commit_key(commit_id))
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.db.get(key.as_bytes()).map_err(storage_error)? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn row_exists(&self, item_type: ItemType, db_id: DbId) -> Result<bool> {
        Ok(self
            .db
            .get(row_key(item_type, db_id).as_bytes())
            .map_err(storage_error)?
            .is_some())
    }

    fn last_db_id(&self, item_type: ItemType) -> Result<i64> {
        Ok(self.get(&last_db_id_key(item_type))?.unwrap_or(0))
    }
}

impl Storage for RocksStorage {
    fn fetch(&self, item_type: ItemType) -> Result<Vec<Record>> {
        let prefix = table_prefix(item_type);
        let mut rows = Vec::new();
        for entry in self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward))
        {
            let (key, value) = entry.map_err(storage_error)?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }

    fn reserve_ids(&self, item_type: ItemType, count: usize) -> Result<Vec<DbId>> {
        let _guard = self.write_lock.lock();
        let last = self.last_db_id(item_type)?;
        let next_last = last + count as i64;
        self.db
            .put(last_db_id_key(item_type).as_bytes(), encode(&next_last)?)
            .map_err(storage_error)?;
        Ok((last + 1..=next_last).map(DbId::new).collect())
    }

    fn apply_mutations(
        &self,
        commit: CommitInfo,
        mutations: Vec<StorageMutation>,
    ) -> Result<CommitId> {
        let _guard = self.write_lock.lock();
        for mutation in &mutations {
            match mutation {
                StorageMutation::Insert { item_type, row } => {
                    let db_id = require_db_id(row)?;
                    if self.row_exists(*item_type, db_id)? {
                        return Err(SpineDbError::StorageError(format!(
                            "{item_type} row {db_id} already exists"
                        )));
                    }
                }
                StorageMutation::Update { item_type, row } => {
                    let db_id = require_db_id(row)?;
                    if !self.row_exists(*item_type, db_id)? {
                        return Err(SpineDbError::StaleRow {
                            item_type: *item_type,
                            db_id,
                        });
                    }
                }
                StorageMutation::Delete { .. } => {}
            }
        }

        let count: u64 = self.get(KEY_COMMIT_COUNT)?.unwrap_or(0) + 1;
        let commit_id = CommitId::new(count as i64);
        let mut batch = WriteBatch::default();
        batch.put(KEY_COMMIT_COUNT.as_bytes(), encode(&count)?);
        batch.put(commit_key(commit_id).as_bytes(), encode(&commit)?);
        let mutation_count = mutations.len();
        for mutation in mutations {
            match mutation {
                StorageMutation::Insert { item_type, mut row }
                | StorageMutation::Update { item_type, mut row } => {
                    let db_id = require_db_id(&row)?;
                    row.insert(COMMIT_ID_FIELD.to_string(), Value::Integer(commit_id.get()));
                    batch.put(row_key(item_type, db_id).as_bytes(), encode(&row)?);
                }
                StorageMutation::Delete { item_type, db_id } => {
                    batch.delete(row_key(item_type, db_id).as_bytes());
                }
            }
        }
        self.db.write(batch).map_err(storage_error)?;
        debug!(
            "RocksDB storage applied {} mutations as commit {}",
            mutation_count, commit_id
        );
        Ok(commit_id)
    }

    fn commit_count(&self) -> Result<u64> {
        Ok(self.get(KEY_COMMIT_COUNT)?.unwrap_or(0))
    }
}

fn table_prefix(item_type: ItemType) -> String {
    format!("{item_type}/")
}

fn row_key(item_type: ItemType, db_id: DbId) -> String {
    format!("{item_type}/{:020}", db_id.get())
}

fn last_db_id_key(item_type: ItemType) -> String {
    format!("__last_id/{item_type}")
}

fn commit_key(commit_id: CommitId) -> String {
    format!("__commit/{:020}", commit_id.get())
}

fn require_db_id(row: &Record) -> Result<DbId> {
    row_db_id(row).ok_or_else(|| SpineDbError::StorageError("row without an id".to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| SpineDbError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| SpineDbError::SerializationError(e.to_string()))
}

fn storage_error(e: rocksdb::Error) -> SpineDbError {
    SpineDbError::StorageError(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::record;

    #[test]
    fn rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_id = {
            let storage = RocksStorage::open(dir.path()).unwrap();
            let ids = storage.reserve_ids(ItemType::Scenario, 1).unwrap();
            storage
                .apply_mutations(
                    CommitInfo::new("first", "tester"),
                    vec![StorageMutation::Insert {
                        item_type: ItemType::Scenario,
                        row: record([
                            ("id", Value::Integer(ids[0].get())),
                            ("name", Value::from("base")),
                        ]),
                    }],
                )
                .unwrap();
            ids[0]
        };

        let storage = RocksStorage::open(dir.path()).unwrap();
        assert_eq!(storage.commit_count().unwrap(), 1);
        let rows = storage.fetch(ItemType::Scenario).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(row_db_id(&rows[0]), Some(db_id));
        assert_eq!(rows[0]["commit_id"], Value::Integer(1));
        assert!(storage.fetch(ItemType::ScenarioAlternative).unwrap().is_empty());
        assert_eq!(
            storage.commit(CommitId::new(1)).unwrap().map(|c| c.comment),
            Some("first".to_string())
        );
        assert_eq!(
            storage.reserve_ids(ItemType::Scenario, 1).unwrap(),
            vec![DbId::new(db_id.get() + 1)]
        );
    }

    #[test]
    fn inserting_an_existing_row_rejects_the_commit() {
        let dir = tempfile::tempdir().unwrap();
        let storage = RocksStorage::open(dir.path()).unwrap();
        let insert = |name: &str| StorageMutation::Insert {
            item_type: ItemType::Scenario,
            row: record([("id", Value::Integer(1)), ("name", Value::from(name))]),
        };
        storage
            .apply_mutations(CommitInfo::new("first", "tester"), vec![insert("base")])
            .unwrap();

        let result = storage.apply_mutations(CommitInfo::new("again", "tester"), vec![insert("other")]);
        assert!(matches!(result, Err(SpineDbError::StorageError(_))));
        assert_eq!(storage.commit_count().unwrap(), 1);
        let rows = storage.fetch(ItemType::Scenario).unwrap();
        assert_eq!(rows[0]["name"], Value::from("base"));
    }
}
