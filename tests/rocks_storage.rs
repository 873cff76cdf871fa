#![cfg(feature = "rocksdb")]

use std::sync::Arc;

use spinedb::prelude::*;
use spinedb::RocksStorage;
use tempfile::tempdir;

fn open_session(storage: &Arc<RocksStorage>) -> DatabaseMapping {
    let storage: Arc<dyn Storage> = storage.clone();
    DatabaseMapping::new(storage, MappingConfig::default()).unwrap()
}

#[test]
fn test_sessions_share_a_rocksdb_database() {
    let dir = tempdir().unwrap();
    let storage = Arc::new(RocksStorage::open(dir.path()).unwrap());

    let mut mine = open_session(&storage);
    let fish = mine
        .add_item(ItemType::EntityClass, record([("name", Value::from("fish"))]))
        .unwrap();
    mine.add_item(
        ItemType::Entity,
        record([("class_id", Value::Ref(fish)), ("name", Value::from("nemo"))]),
    )
    .unwrap();
    mine.commit_session("Add nemo").unwrap();

    let mut theirs = open_session(&storage);
    theirs.fetch_all(ItemType::Entity).unwrap();
    let nemo = theirs.items(ItemType::Entity)[0].id();
    theirs
        .update_item(ItemType::Entity, nemo, record([("description", Value::from("clownfish"))]))
        .unwrap();
    theirs.commit_session("Describe nemo").unwrap();

    assert!(mine.has_external_commits().unwrap());
    let report = mine.fetch_all(ItemType::Entity).unwrap();
    assert_eq!(report.added, 0);
    assert_eq!(report.refreshed, 1);
    let entities = mine.items(ItemType::Entity);
    let item = entities[0];
    assert_eq!(item.get("description"), Some(&Value::from("clownfish")));
    assert_eq!(item.get("class_id"), Some(&Value::Ref(fish)));
}

#[test]
fn test_conflicts_resolve_against_reopened_database() {
    let dir = tempdir().unwrap();
    {
        let storage = Arc::new(RocksStorage::open(dir.path()).unwrap());
        let mut db_map = open_session(&storage);
        db_map
            .add_item(ItemType::Alternative, record([("name", Value::from("cat"))]))
            .unwrap();
        db_map.commit_session("Add cat").unwrap();
    }

    let storage = Arc::new(RocksStorage::open(dir.path()).unwrap());
    assert_eq!(storage.commit_count().unwrap(), 1);
    let mut mine = open_session(&storage);
    let mut theirs = open_session(&storage);
    mine.fetch_all(ItemType::Alternative).unwrap();
    theirs.fetch_all(ItemType::Alternative).unwrap();

    let cat = mine.find_item(ItemType::Alternative, &[Value::from("cat")]).unwrap().id();
    mine.update_item(ItemType::Alternative, cat, record([("name", Value::from("bigglesworth"))]))
        .unwrap();
    let their_cat = theirs.find_item(ItemType::Alternative, &[Value::from("cat")]).unwrap().id();
    theirs
        .update_item(ItemType::Alternative, their_cat, record([("name", Value::from("tom"))]))
        .unwrap();
    theirs.commit_session("Rename to tom").unwrap();

    mine.commit_session("Rename to bigglesworth").unwrap();
    let rows = storage.fetch(ItemType::Alternative).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], Value::from("bigglesworth"));
    assert_eq!(rows[0]["commit_id"], Value::Integer(3));
    let info = storage.commit(CommitId::new(3)).unwrap().unwrap();
    assert_eq!(info.comment, "Rename to bigglesworth");
}
