use super::*;
use catalog::{Column, TableMeta};
use common::Record;
use serde_json::json;
use types::{ScalarKind, Value};

fn sample_meta() -> TableMeta {
    TableMeta::try_new(
        "Character",
        vec![
            Column::scalar("id", ScalarKind::Id, false),
            Column::scalar("ct", ScalarKind::String, false),
            Column::scalar("h", ScalarKind::Int, false),
        ],
        "id",
    )
    .unwrap()
}

fn seeded_table(dir: &std::path::Path) -> Table {
    let config = StoreConfig::default();
    let mut table = Table::create("Character", dir, sample_meta(), &config).unwrap();
    for (id, ct, h) in [("luke", "Human", 172), ("vader", "Human", 202), ("r2", "Droid", 96)] {
        table
            .insert(
                Record::new()
                    .with("id", Value::String(id.into()))
                    .with("ct", Value::String(ct.into()))
                    .with("h", Value::Int(h)),
                false,
            )
            .unwrap();
    }
    table.flush_memtable().unwrap();
    table
}

#[test]
fn creates_index_once_threshold_is_reached() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = seeded_table(dir.path());
    let mut advisor = IndexAdvisor::new(3);

    let node = filterengine::parse_where(table.metadata(), &json!({"ct": {"equals": "Human"}})).unwrap();
    for _ in 0..2 {
        advisor.observe("Character", &mut table, &node).unwrap();
        assert!(!table.metadata().has_index("ct"));
    }
    advisor.observe("Character", &mut table, &node).unwrap();
    assert!(table.metadata().has_index("ct"));
}

#[test]
fn zero_threshold_disables_dynamic_indexing() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = seeded_table(dir.path());
    let mut advisor = IndexAdvisor::new(0);

    let node = filterengine::parse_where(table.metadata(), &json!({"ct": {"equals": "Human"}})).unwrap();
    for _ in 0..10 {
        advisor.observe("Character", &mut table, &node).unwrap();
    }
    assert!(!table.metadata().has_index("ct"));
}

#[test]
fn already_indexed_field_is_never_counted() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = seeded_table(dir.path());
    table.create_index("h", IndexKind::BTree).unwrap();
    let mut advisor = IndexAdvisor::new(1);

    let node = filterengine::parse_where(table.metadata(), &json!({"h": {"gt": 100}})).unwrap();
    advisor.observe("Character", &mut table, &node).unwrap();
    assert!(table.metadata().has_index("h"));
}

#[test]
fn fields_under_not_still_count() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = seeded_table(dir.path());
    let mut advisor = IndexAdvisor::new(1);

    let node = filterengine::parse_where(table.metadata(), &json!({"NOT": {"ct": {"equals": "Droid"}}})).unwrap();
    advisor.observe("Character", &mut table, &node).unwrap();
    assert!(table.metadata().has_index("ct"));
}

#[test]
fn non_indexable_operators_are_not_counted() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = seeded_table(dir.path());
    let mut advisor = IndexAdvisor::new(1);

    let node =
        filterengine::parse_where(table.metadata(), &json!({"ct": {"contains": "Hu"}})).unwrap();
    advisor.observe("Character", &mut table, &node).unwrap();
    assert!(!table.metadata().has_index("ct"));
}
