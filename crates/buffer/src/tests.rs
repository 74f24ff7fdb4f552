use super::*;
use tempfile::tempdir;

#[test]
fn allocate_and_fetch_persist_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("table.tbl");
    let mut cache = PageCache::open(&path, 2).unwrap();

    let pid = cache.allocate_page().unwrap();
    cache.fetch_page_mut(pid).unwrap().data[0..4].copy_from_slice(&[1, 2, 3, 4]);
    cache.flush().unwrap();

    let mut cache2 = PageCache::open(&path, 2).unwrap();
    let page2 = cache2.fetch_page(pid).unwrap();
    assert_eq!(&page2.data[0..4], &[1, 2, 3, 4]);
}

#[test]
fn lru_eviction_flushes_dirty_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("table.tbl");
    let mut cache = PageCache::open(&path, 1).unwrap();

    let pid1 = cache.allocate_page().unwrap();
    cache.fetch_page_mut(pid1).unwrap().data[0] = 99;

    let _pid2 = cache.allocate_page().unwrap();
    cache.flush().unwrap();

    let mut cache2 = PageCache::open(&path, 2).unwrap();
    assert_eq!(cache2.fetch_page(pid1).unwrap().data[0], 99);
}

#[test]
fn fetch_page_updates_lru_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("table.tbl");
    let mut cache = PageCache::open(&path, 2).unwrap();

    let pid0 = cache.allocate_page().unwrap();
    let pid1 = cache.allocate_page().unwrap();

    cache.fetch_page(pid0).unwrap();

    // Allocating a third page should evict pid1, not the recently-used pid0.
    let _pid2 = cache.allocate_page().unwrap();
    cache.fetch_page_mut(pid0).unwrap().data[0] = 77;
    cache.fetch_page(pid1).unwrap();
}

#[test]
fn dirty_tracking_only_writes_modified_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("table.tbl");
    let mut cache = PageCache::open(&path, 3).unwrap();

    let pid0 = cache.allocate_page().unwrap();
    let _pid1 = cache.allocate_page().unwrap();
    cache.fetch_page_mut(pid0).unwrap().data[0] = 42;

    cache.flush().unwrap();

    let mut cache2 = PageCache::open(&path, 2).unwrap();
    assert_eq!(cache2.fetch_page(pid0).unwrap().data[0], 42);
}

#[test]
fn metadata_page_is_independent_of_lru_cache() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("table.tbl");
    let mut cache = PageCache::open(&path, 2).unwrap();

    cache.write_metadata_page(b"metadata-bytes").unwrap();
    let page = cache.read_metadata_page().unwrap();
    assert_eq!(&page.data[..15], b"metadata-bytes");
}

#[test]
#[should_panic(expected = "capacity_pages must be > 0")]
fn zero_capacity_panics() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("table.tbl");
    let _ = PageCache::open(&path, 0).unwrap();
}
