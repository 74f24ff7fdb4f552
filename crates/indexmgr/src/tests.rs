use super::*;
use catalog::Column;
use tempfile::tempdir;
use types::{ScalarKind, Value};

fn sample_meta() -> TableMeta {
    TableMeta::try_new(
        "users",
        vec![
            Column::scalar("id", ScalarKind::Id, false),
            Column::scalar("age", ScalarKind::Int, true),
        ],
        "id",
    )
    .unwrap()
}

fn sample_record(id: &str, age: i64) -> Record {
    [
        ("id", Value::String(id.to_string())),
        ("age", Value::Int(age)),
    ]
    .into_iter()
    .collect()
}

#[test]
fn create_fresh_starts_with_empty_primary_and_no_secondary() {
    let dir = tempdir().unwrap();
    let mgr = IndexManager::create_fresh(dir.path(), "users", 8).unwrap();
    assert_eq!(mgr.primary_lookup("u1"), None);
    assert!(!mgr.has_index("age"));
}

#[test]
fn index_record_updates_primary_and_secondary() {
    let dir = tempdir().unwrap();
    let mut mgr = IndexManager::create_fresh(dir.path(), "users", 8).unwrap();
    mgr.create_index("age", IndexKind::BTree).unwrap();

    let rid = RecordId {
        page_id: PageId(3),
        slot: 0,
    };
    mgr.index_record(rid, &sample_record("u1", 30)).unwrap();

    assert_eq!(mgr.primary_lookup("u1"), Some(PageId(3)));
    let hits = mgr.btree("age").unwrap().search(&Value::Int(30)).unwrap();
    assert_eq!(hits, vec![rid]);
}

#[test]
fn null_column_value_is_not_indexed() {
    let dir = tempdir().unwrap();
    let mut mgr = IndexManager::create_fresh(dir.path(), "users", 8).unwrap();
    mgr.create_index("age", IndexKind::BTree).unwrap();

    let rid = RecordId {
        page_id: PageId(1),
        slot: 0,
    };
    let record: Record = [("id", Value::String("u1".into()))].into_iter().collect();
    mgr.index_record(rid, &record).unwrap();

    assert!(mgr.btree("age").unwrap().all_sorted().unwrap().is_empty());
}

#[test]
fn unindex_record_removes_from_every_index() {
    let dir = tempdir().unwrap();
    let mut mgr = IndexManager::create_fresh(dir.path(), "users", 8).unwrap();
    mgr.create_index("age", IndexKind::BTree).unwrap();

    let rid = RecordId {
        page_id: PageId(3),
        slot: 0,
    };
    let record = sample_record("u1", 30);
    mgr.index_record(rid, &record).unwrap();
    mgr.unindex_record(rid, &record).unwrap();

    assert_eq!(mgr.primary_lookup("u1"), None);
    assert!(mgr.btree("age").unwrap().search(&Value::Int(30)).unwrap().is_empty());
}

#[test]
fn create_index_is_idempotent() {
    let dir = tempdir().unwrap();
    let mut mgr = IndexManager::create_fresh(dir.path(), "users", 8).unwrap();
    mgr.create_index("age", IndexKind::BTree).unwrap();
    mgr.create_index("age", IndexKind::BTree).unwrap();
    assert!(mgr.has_index("age"));
}

#[test]
fn drop_index_removes_sidecar_file() {
    let dir = tempdir().unwrap();
    let mut mgr = IndexManager::create_fresh(dir.path(), "users", 8).unwrap();
    mgr.create_index("age", IndexKind::BTree).unwrap();
    mgr.save_all().unwrap();

    mgr.drop_index("age").unwrap();
    assert!(!mgr.has_index("age"));
}

#[test]
fn save_all_then_load_adopts_every_sidecar() {
    let dir = tempdir().unwrap();
    let meta = {
        let mut meta = sample_meta();
        meta.add_index(catalog::IndexMeta {
            field: "age".into(),
            kind: IndexKind::BTree,
        })
        .unwrap();
        meta
    };

    let rid = RecordId {
        page_id: PageId(3),
        slot: 0,
    };
    {
        let mut mgr = IndexManager::create_fresh(dir.path(), "users", 8).unwrap();
        mgr.create_index("age", IndexKind::BTree).unwrap();
        mgr.index_record(rid, &sample_record("u1", 30)).unwrap();
        mgr.save_all().unwrap();
    }

    let (mut mgr, plan) = IndexManager::load(dir.path(), "users", &meta, 8).unwrap();
    assert_eq!(plan, RebuildPlan::default());
    assert_eq!(mgr.primary_lookup("u1"), Some(PageId(3)));
    assert_eq!(
        mgr.btree("age").unwrap().search(&Value::Int(30)).unwrap(),
        vec![rid]
    );
}

#[test]
fn load_reports_rebuild_plan_for_missing_sidecars() {
    let dir = tempdir().unwrap();
    let meta = {
        let mut meta = sample_meta();
        meta.add_index(catalog::IndexMeta {
            field: "age".into(),
            kind: IndexKind::BTree,
        })
        .unwrap();
        meta
    };

    // Never created: primary and secondary sidecars don't exist yet.
    let (_, plan) = IndexManager::load(dir.path(), "users", &meta, 8).unwrap();
    assert!(plan.primary);
    assert_eq!(plan.secondary, vec!["age".to_string()]);
}

#[test]
fn rebuild_replays_records_into_named_indexes() {
    let dir = tempdir().unwrap();
    let mut mgr = IndexManager::create_fresh(dir.path(), "users", 8).unwrap();

    let plan = RebuildPlan {
        primary: true,
        secondary: vec!["age".to_string()],
    };

    let r1 = sample_record("u1", 30);
    let r2 = sample_record("u2", 40);
    let rid1 = RecordId {
        page_id: PageId(1),
        slot: 0,
    };
    let rid2 = RecordId {
        page_id: PageId(1),
        slot: 1,
    };
    let records = vec![(rid1, &r1), (rid2, &r2)];

    mgr.rebuild(&plan, records.into_iter()).unwrap();

    assert_eq!(mgr.primary_lookup("u1"), Some(PageId(1)));
    assert_eq!(mgr.primary_lookup("u2"), Some(PageId(1)));
    assert_eq!(
        mgr.btree("age").unwrap().search(&Value::Int(30)).unwrap(),
        vec![rid1]
    );
}
