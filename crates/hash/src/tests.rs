use super::*;
use tempfile::tempdir;

#[test]
fn put_and_get_round_trip() {
    let mut index = HashIndex::new();
    index.put("user-1", PageId(3));
    assert_eq!(index.get("user-1"), Some(PageId(3)));
    assert_eq!(index.get("missing"), None);
}

#[test]
fn put_overwrites_existing_key() {
    let mut index = HashIndex::new();
    index.put("user-1", PageId(3));
    index.put("user-1", PageId(7));
    assert_eq!(index.get("user-1"), Some(PageId(7)));
    assert_eq!(index.len(), 1);
}

#[test]
fn remove_returns_previous_value() {
    let mut index = HashIndex::new();
    index.put("user-1", PageId(3));
    assert_eq!(index.remove("user-1"), Some(PageId(3)));
    assert_eq!(index.get("user-1"), None);
    assert_eq!(index.remove("user-1"), None);
}

#[test]
fn save_and_load_round_trip_in_memory() {
    let mut index = HashIndex::new();
    index.put("a", PageId(1));
    index.put("b", PageId(2));
    index.put("c", PageId(3));

    let mut buf = Vec::new();
    index.save(&mut buf).unwrap();

    let loaded = HashIndex::load(&buf[..]).unwrap();
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded.get("a"), Some(PageId(1)));
    assert_eq!(loaded.get("b"), Some(PageId(2)));
    assert_eq!(loaded.get("c"), Some(PageId(3)));
}

#[test]
fn create_then_open_from_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("primary.idx");

    {
        let mut index = HashIndex::create(&path).unwrap();
        index.put("alpha", PageId(10));
        index.flush(&path).unwrap();
    }

    let reopened = HashIndex::open(&path).unwrap();
    assert_eq!(reopened.get("alpha"), Some(PageId(10)));
}

#[test]
fn empty_index_saves_and_loads() {
    let index = HashIndex::new();
    let mut buf = Vec::new();
    index.save(&mut buf).unwrap();

    let loaded = HashIndex::load(&buf[..]).unwrap();
    assert!(loaded.is_empty());
}

#[test]
fn iter_exposes_every_entry() {
    let mut index = HashIndex::new();
    index.put("x", PageId(1));
    index.put("y", PageId(2));

    let mut seen: Vec<(String, u64)> = index.iter().map(|(k, v)| (k.to_string(), v.0)).collect();
    seen.sort();
    assert_eq!(seen, vec![("x".to_string(), 1), ("y".to_string(), 2)]);
}

#[test]
fn load_rejects_garbage_bytes() {
    let garbage = vec![0xffu8; 8];
    assert!(HashIndex::load(&garbage[..]).is_err());
}
