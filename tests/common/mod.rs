//! Common utilities for spinedb integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use spinedb::prelude::*;

/// Creates an empty shared database.
pub fn setup_storage() -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::new())
}

/// Opens a session with the default configuration.
pub fn open_session(storage: &Arc<MemoryStorage>) -> DatabaseMapping {
    open_session_with(storage, MappingConfig::default())
}

pub fn open_session_with(storage: &Arc<MemoryStorage>, config: MappingConfig) -> DatabaseMapping {
    let storage: Arc<dyn Storage> = storage.clone();
    DatabaseMapping::new(storage, config).expect("memory storage never fails")
}

pub fn name(value: &str) -> Record {
    record([("name", Value::from(value))])
}

/// Commits one alternative per name from a throwaway session.
pub fn seed_alternatives(storage: &Arc<MemoryStorage>, names: &[&str]) {
    let mut db_map = open_session(storage);
    for alternative in names {
        db_map
            .add_item(ItemType::Alternative, name(alternative))
            .expect("valid alternative");
    }
    db_map.commit_session("Seed alternatives").expect("commit seed");
}

/// Looks up a live alternative by name.
pub fn alternative_id(db_map: &DatabaseMapping, alternative: &str) -> ItemId {
    db_map
        .find_item(ItemType::Alternative, &[Value::from(alternative)])
        .map(MappedItem::id)
        .unwrap_or_else(|| panic!("no alternative named {alternative}"))
}

/// Names of the alternatives stored in the database, sorted.
pub fn stored_alternative_names(storage: &Arc<MemoryStorage>) -> Vec<String> {
    let mut names: Vec<String> = storage
        .fetch(ItemType::Alternative)
        .expect("memory storage never fails")
        .iter()
        .filter_map(|row| row.get("name").and_then(Value::as_text).map(str::to_string))
        .collect();
    names.sort();
    names
}
