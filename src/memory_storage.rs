use ahash::AHashMap as HashMap;
use log::debug;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::data_store::item_id::{CommitId, DbId};
use crate::data_store::mapped_item::{row_db_id, COMMIT_ID_FIELD};
use crate::errors::{Result, SpineDbError};
use crate::item_type::ItemType;
use crate::storage::{CommitInfo, Storage, StorageMutation};
use crate::value::{Record, Value};

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<ItemType, BTreeMap<DbId, Record>>,
    last_db_id: HashMap<ItemType, i64>,
    commits: Vec<CommitInfo>,
}

/// A [`Storage`] that keeps every table in memory.
///
/// Cloning the surrounding `Arc` and handing it to several mappings gives
/// them a shared database, which is how concurrent sessions are modelled in
/// tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a single row, if present.
    pub fn row(&self, item_type: ItemType, db_id: DbId) -> Option<Record> {
        let tables = self.tables.read();
        tables.rows.get(&item_type)?.get(&db_id).cloned()
    }

    pub fn row_count(&self, item_type: ItemType) -> usize {
        self.tables
            .read()
            .rows
            .get(&item_type)
            .map_or(0, BTreeMap::len)
    }

    /// Metadata of every commit, oldest first.
    pub fn commits(&self) -> Vec<CommitInfo> {
        self.tables.read().commits.clone()
    }
}

impl Storage for MemoryStorage {
    fn fetch(&self, item_type: ItemType) -> Result<Vec<Record>> {
        let tables = self.tables.read();
        Ok(tables
            .rows
            .get(&item_type)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn reserve_ids(&self, item_type: ItemType, count: usize) -> Result<Vec<DbId>> {
        let mut tables = self.tables.write();
        let last = tables.last_db_id.entry(item_type).or_insert(0);
        let ids = (1..=count as i64).map(|offset| DbId::new(*last + offset)).collect();
        *last += count as i64;
        Ok(ids)
    }

    fn apply_mutations(
        &self,
        commit: CommitInfo,
        mutations: Vec<StorageMutation>,
    ) -> Result<CommitId> {
        let mut tables = self.tables.write();

        // Validate everything before touching any table.
        for mutation in &mutations {
            match mutation {
                StorageMutation::Insert { item_type, row } => {
                    let db_id = require_db_id(row)?;
                    if tables.rows.get(item_type).is_some_and(|r| r.contains_key(&db_id)) {
                        return Err(SpineDbError::StorageError(format!(
                            "{item_type} row {db_id} already exists"
                        )));
                    }
                }
                StorageMutation::Update { item_type, row } => {
                    let db_id = require_db_id(row)?;
                    if !tables.rows.get(item_type).is_some_and(|r| r.contains_key(&db_id)) {
                        return Err(SpineDbError::StaleRow {
                            item_type: *item_type,
                            db_id,
                        });
                    }
                }
                StorageMutation::Delete { .. } => {}
            }
        }

        tables.commits.push(commit);
        let commit_id = CommitId::new(tables.commits.len() as i64);
        let mutation_count = mutations.len();
        for mutation in mutations {
            match mutation {
                StorageMutation::Insert { item_type, mut row }
                | StorageMutation::Update { item_type, mut row } => {
                    let db_id = require_db_id(&row)?;
                    row.insert(COMMIT_ID_FIELD.to_string(), Value::Integer(commit_id.get()));
                    tables.rows.entry(item_type).or_default().insert(db_id, row);
                    let last = tables.last_db_id.entry(item_type).or_insert(0);
                    *last = (*last).max(db_id.get());
                }
                StorageMutation::Delete { item_type, db_id } => {
                    if let Some(rows) = tables.rows.get_mut(&item_type) {
                        rows.remove(&db_id);
                    }
                }
            }
        }
        debug!(
            "Memory storage applied {} mutations as commit {}",
            mutation_count, commit_id
        );
        Ok(commit_id)
    }

    fn commit_count(&self) -> Result<u64> {
        Ok(self.tables.read().commits.len() as u64)
    }
}

fn require_db_id(row: &Record) -> Result<DbId> {
    row_db_id(row).ok_or_else(|| SpineDbError::StorageError("row without an id".to_string()))
}
