mod common;

use spinedb::prelude::*;

use common::{alternative_id, name, open_session, open_session_with, seed_alternatives, setup_storage, stored_alternative_names};

#[test]
fn test_commit_translates_references_to_db_ids() {
    let storage = setup_storage();
    let mut db_map = open_session(&storage);

    let fish = db_map.add_item(ItemType::EntityClass, name("fish")).unwrap();
    let nemo = db_map
        .add_item(
            ItemType::Entity,
            record([("class_id", Value::Ref(fish)), ("name", Value::from("nemo"))]),
        )
        .unwrap();
    let weight = db_map
        .add_item(
            ItemType::ParameterDefinition,
            record([("entity_class_id", Value::Ref(fish)), ("name", Value::from("weight"))]),
        )
        .unwrap();
    let base = db_map.add_item(ItemType::Alternative, name("Base")).unwrap();
    db_map
        .add_item(
            ItemType::ParameterValue,
            record([
                ("parameter_definition_id", Value::Ref(weight)),
                ("entity_id", Value::Ref(nemo)),
                ("alternative_id", Value::Ref(base)),
                ("value", Value::Float(2.3)),
            ]),
        )
        .unwrap();

    let commit_id = db_map.commit_session("Add nemo").unwrap();
    assert_eq!(commit_id, CommitId::new(1));
    assert!(!db_map.has_uncommitted_changes());

    let fish_db_id = db_map.get_item(ItemType::EntityClass, fish).unwrap().db_id().unwrap();
    let nemo_item = db_map.get_item(ItemType::Entity, nemo).unwrap();
    assert!(nemo_item.is_committed());
    assert_eq!(nemo_item.commit_id(), Some(commit_id));
    let row = storage.row(ItemType::Entity, nemo_item.db_id().unwrap()).unwrap();
    assert_eq!(row["class_id"], Value::Integer(fish_db_id.get()));
    assert_eq!(row["commit_id"], Value::Integer(1));

    // A second session sees the same graph in its own id space.
    let mut other = open_session(&storage);
    let report = other.fetch_all(ItemType::ParameterValue).unwrap();
    assert_eq!(report.added, 5);
    assert_eq!(report.conflicts, 0);
    let other_fish = other.find_item(ItemType::EntityClass, &[Value::from("fish")]).unwrap().id();
    let other_nemo = other
        .find_item(ItemType::Entity, &[Value::Ref(other_fish), Value::from("nemo")])
        .unwrap();
    let values = other.items(ItemType::ParameterValue);
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].get("entity_id"), Some(&Value::Ref(other_nemo.id())));
    assert_eq!(values[0].get("value"), Some(&Value::Float(2.3)));
}

#[test]
fn test_fetch_without_referenced_types_skips_unresolved_rows() {
    let storage = setup_storage();
    let mut writer = open_session(&storage);
    let fish = writer.add_item(ItemType::EntityClass, name("fish")).unwrap();
    writer
        .add_item(
            ItemType::Entity,
            record([("class_id", Value::Ref(fish)), ("name", Value::from("nemo"))]),
        )
        .unwrap();
    writer.commit_session("Add nemo").unwrap();

    let config = MappingConfig::default().with_fetch_referenced_types(false);
    let mut db_map = open_session_with(&storage, config);
    let report = db_map.fetch_all(ItemType::Entity).unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.added, 0);
    assert!(db_map.items(ItemType::Entity).is_empty());
    assert!(db_map.mapped_table(ItemType::EntityClass).is_none());

    db_map.fetch_all(ItemType::EntityClass).unwrap();
    let report = db_map.fetch_all(ItemType::Entity).unwrap();
    assert_eq!(report.skipped, 0);
    assert_eq!(report.added, 1);
}

#[test]
fn test_committed_items_stay_in_sync_after_refresh() {
    let storage = setup_storage();
    seed_alternatives(&storage, &["Base"]);
    let mut db_map = open_session(&storage);
    db_map.fetch_all(ItemType::Alternative).unwrap();
    let base = alternative_id(&db_map, "Base");

    db_map
        .update_item(ItemType::Alternative, base, record([("description", Value::from("Reference"))]))
        .unwrap();
    assert_eq!(db_map.get_item(ItemType::Alternative, base).unwrap().status(), Status::ToUpdate);
    assert!(db_map.has_uncommitted_changes());
    db_map.commit_session("Describe base").unwrap();

    let item = db_map.get_item(ItemType::Alternative, base).unwrap();
    assert!(item.is_committed());
    let row = storage.row(ItemType::Alternative, item.db_id().unwrap()).unwrap();
    assert_eq!(row["description"], Value::from("Reference"));

    let report = db_map.refresh_session().unwrap();
    assert_eq!(report, FetchReport::default());
}

#[test]
fn test_update_back_to_committed_content() {
    let storage = setup_storage();
    seed_alternatives(&storage, &["Base"]);
    let mut db_map = open_session(&storage);
    db_map.fetch_all(ItemType::Alternative).unwrap();
    let base = alternative_id(&db_map, "Base");

    db_map.update_item(ItemType::Alternative, base, name("Other")).unwrap();
    db_map.update_item(ItemType::Alternative, base, name("Base")).unwrap();
    assert!(db_map.get_item(ItemType::Alternative, base).unwrap().is_committed());
    assert!(matches!(
        db_map.commit_session("Nothing really"),
        Err(SpineDbError::NothingToCommit)
    ));
}

#[test]
fn test_removal_cascades_to_database() {
    let storage = setup_storage();
    let mut db_map = open_session(&storage);
    let fish = db_map.add_item(ItemType::EntityClass, name("fish")).unwrap();
    let nemo = db_map
        .add_item(
            ItemType::Entity,
            record([("class_id", Value::Ref(fish)), ("name", Value::from("nemo"))]),
        )
        .unwrap();
    db_map.commit_session("Add fish").unwrap();

    let removed = db_map.remove_item(ItemType::EntityClass, fish).unwrap();
    assert_eq!(removed.len(), 2);
    let dirty = db_map.dirty_items();
    assert_eq!(dirty.len(), 2);
    assert_eq!(dirty[0].0, ItemType::EntityClass);
    assert_eq!(dirty[0].1.to_remove, vec![fish]);
    assert_eq!(dirty[1].1.to_remove, vec![nemo]);

    db_map.commit_session("Remove fish").unwrap();
    assert_eq!(storage.row_count(ItemType::EntityClass), 0);
    assert_eq!(storage.row_count(ItemType::Entity), 0);
    assert!(db_map.get_item(ItemType::EntityClass, fish).is_none());
    assert!(db_map.get_item(ItemType::Entity, nemo).is_none());
}

#[test]
fn test_added_and_removed_items_write_nothing() {
    let storage = setup_storage();
    let mut db_map = open_session(&storage);
    let temp = db_map.add_item(ItemType::Scenario, name("temp")).unwrap();
    db_map.remove_item(ItemType::Scenario, temp).unwrap();
    assert_eq!(
        db_map.get_item(ItemType::Scenario, temp).unwrap().status(),
        Status::AddedAndRemoved
    );
    assert!(!db_map.has_uncommitted_changes());
    assert!(matches!(
        db_map.commit_session("Nothing"),
        Err(SpineDbError::NothingToCommit)
    ));
    assert_eq!(storage.commit_count().unwrap(), 0);
}

#[test]
fn test_rollback_discards_every_change() {
    let storage = setup_storage();
    seed_alternatives(&storage, &["Base", "Other"]);
    let mut db_map = open_session(&storage);
    db_map.fetch_all(ItemType::Alternative).unwrap();
    let base = alternative_id(&db_map, "Base");
    let other = alternative_id(&db_map, "Other");

    db_map.update_item(ItemType::Alternative, base, name("High")).unwrap();
    db_map.remove_item(ItemType::Alternative, other).unwrap();
    let added = db_map.add_item(ItemType::Alternative, name("New")).unwrap();

    db_map.rollback_session().unwrap();
    assert_eq!(
        db_map.get_item(ItemType::Alternative, base).unwrap().get("name"),
        Some(&Value::from("Base"))
    );
    assert!(db_map.get_item(ItemType::Alternative, other).unwrap().is_committed());
    assert!(db_map.get_item(ItemType::Alternative, added).is_none());
    assert!(!db_map.has_uncommitted_changes());
    assert!(matches!(
        db_map.rollback_session(),
        Err(SpineDbError::NothingToRollback)
    ));
    assert_eq!(stored_alternative_names(&storage), vec!["Base", "Other"]);
}

#[test]
fn test_external_commits_are_detected() {
    let storage = setup_storage();
    let mut first = open_session(&storage);
    let mut second = open_session(&storage);
    assert!(!second.has_external_commits().unwrap());

    first.add_item(ItemType::Alternative, name("Base")).unwrap();
    first.commit_session("Add base").unwrap();
    assert!(!first.has_external_commits().unwrap());
    assert!(second.has_external_commits().unwrap());

    second.refresh_session().unwrap();
    assert!(!second.has_external_commits().unwrap());
}

#[test]
fn test_commit_records_metadata() {
    let storage = setup_storage();
    let mut db_map = open_session_with(&storage, MappingConfig::default().with_user("alice"));
    db_map.add_item(ItemType::Alternative, name("Base")).unwrap();
    db_map.commit_session("Initial import").unwrap();

    let commits = storage.commits();
    assert_eq!(commits, vec![CommitInfo::new("Initial import", "alice")]);
}

#[test]
fn test_reset_drops_dependent_tables() {
    let storage = setup_storage();
    let mut db_map = open_session(&storage);
    let fish = db_map.add_item(ItemType::EntityClass, name("fish")).unwrap();
    db_map
        .add_item(
            ItemType::Entity,
            record([("class_id", Value::Ref(fish)), ("name", Value::from("nemo"))]),
        )
        .unwrap();
    db_map.add_item(ItemType::Alternative, name("Base")).unwrap();

    db_map.reset(&[ItemType::EntityClass]);
    assert!(db_map.mapped_table(ItemType::EntityClass).is_none());
    assert!(db_map.mapped_table(ItemType::Entity).is_none());
    assert_eq!(db_map.items(ItemType::Alternative).len(), 1);
}
