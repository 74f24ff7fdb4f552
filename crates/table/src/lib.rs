//! The only public storage handle: one named, typed collection of records
//! backed by a page file (`<name>.tbl`) and zero-or-more index sidecars
//! (`<name>_indexes/<column>.idx`).
//!
//! `Table` composes the pager/cache, memtable, catalog metadata, and index
//! manager behind a single owning struct: nothing below this layer is
//! reachable except through it.
//!
//! Indexes are only populated for *flushed* records: a record staged in the
//! MemTable has no hash or B-tree entry yet. Every lookup path that can be
//! routed through an index therefore also consults the MemTable directly, so
//! a `find`/`find_equals`/`find_range` issued right after an `insert` still
//! sees the inserted value, without needing a placeholder index entry that
//! would have to be reconciled at flush time.


use buffer::{PageCache, Pager};
use catalog::{IndexKind, TableMeta};
use common::{DbError, DbResult, PageId, Record, RecordId, StoreConfig};
use indexmgr::IndexManager;
use memtable::MemTable;
use std::path::{Path, PathBuf};
use storage::codec::{decode_record, encode_record};
use storage::FIRST_DATA_PAGE;
use tracing::warn;
use types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableState {
    Fresh,
    Open,
    Flushing,
    Closed,
}

/// A named, typed collection of records. See module docs.
pub struct Table {
    dir: PathBuf,
    name: String,
    meta: TableMeta,
    cache: PageCache,
    memtable: MemTable,
    indexes: IndexManager,
    state: TableState,
}

fn tbl_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.tbl"))
}

impl Table {
    /// Create a new table: a fresh page file with an empty metadata page.
    pub fn create(name: &str, dir: &Path, meta: TableMeta, config: &StoreConfig) -> DbResult<Self> {
        std::fs::create_dir_all(dir)?;
        let mut cache = PageCache::open(&tbl_path(dir, name), config.cache_capacity_pages)?;
        cache.write_metadata_page(&meta.encode()?)?;
        let indexes = IndexManager::create_fresh(dir, name, config.btree_order)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            meta,
            cache,
            memtable: MemTable::new(config.memtable_threshold_records),
            indexes,
            state: TableState::Fresh,
        })
    }

    /// Open an existing table: read metadata, then ask the index manager to
    /// adopt or rebuild every sidecar.
    pub fn open(name: &str, dir: &Path, config: &StoreConfig) -> DbResult<Self> {
        let mut cache = PageCache::open(&tbl_path(dir, name), config.cache_capacity_pages)?;
        let page = cache.read_metadata_page()?;
        let meta = TableMeta::decode(&page.data)?;

        let (mut indexes, plan) = IndexManager::load(dir, name, &meta, config.btree_order)?;
        if plan.primary || !plan.secondary.is_empty() {
            warn!(table = name, ?plan, "rebuilding corrupted index sidecars");
            let records = Self::scan_pages(&mut cache, &meta)?;
            indexes.rebuild(&plan, records.iter().map(|(rid, r)| (*rid, r)))?;
            indexes.save_all()?;
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            meta,
            cache,
            memtable: MemTable::new(config.memtable_threshold_records),
            indexes,
            state: TableState::Open,
        })
    }

    fn require_writable(&self) -> DbResult<()> {
        if self.state == TableState::Closed {
            return Err(DbError::Closed);
        }
        Ok(())
    }

    /// Insert a new record. Returns `Duplicate` if the id already exists,
    /// unless `overwrite` is set (used internally by [`Table::update`]).
    pub fn insert(&mut self, record: Record, overwrite: bool) -> DbResult<()> {
        self.require_writable()?;
        let id = record
            .id()
            .ok_or_else(|| DbError::Invalid("record has no id field".into()))?
            .to_string();

        if !overwrite && (self.memtable.contains(&id) || self.indexes.primary_lookup(&id).is_some()) {
            return Err(DbError::Duplicate(id));
        }

        let bytes = encode_record(&self.meta, &record);
        self.memtable.put(id, bytes);
        self.state = TableState::Open;

        if self.memtable.should_flush() {
            self.flush_memtable()?;
        }
        Ok(())
    }

    /// Find a record by id: MemTable first, else the hash index plus a
    /// cache-backed page read.
    pub fn find(&mut self, id: &str) -> DbResult<Option<Record>> {
        if let Some(bytes) = self.memtable.get(id) {
            return Ok(Some(decode_record(&self.meta, bytes)?));
        }
        let Some(page_id) = self.indexes.primary_lookup(id) else {
            return Ok(None);
        };
        self.read_record_at(page_id, id)
    }

    fn read_record_at(&mut self, page_id: PageId, id: &str) -> DbResult<Option<Record>> {
        Ok(self.locate_slot(page_id, id)?.map(|(_, record)| record))
    }

    fn locate_slot(&mut self, page_id: PageId, id: &str) -> DbResult<Option<(u16, Record)>> {
        let page = self.cache.fetch_page(page_id)?;
        let header = page.header()?;
        for slot in 0..header.num_slots {
            let s = page.read_slot(slot)?;
            if s.is_empty() {
                continue;
            }
            let start = s.offset as usize;
            let end = start + s.len as usize;
            let record = decode_record(&self.meta, &page.data[start..end])?;
            if record.id() == Some(id) {
                return Ok(Some((slot, record)));
            }
        }
        Ok(None)
    }

    /// Merge `partial` onto the current value and reinsert with overwrite.
    /// Secondary index entries for changed columns are removed, then
    /// re-added under the merged value.
    pub fn update(&mut self, id: &str, partial: Record) -> DbResult<Record> {
        self.require_writable()?;
        let current = self
            .find(id)?
            .ok_or_else(|| DbError::NotFound(id.to_string()))?;
        let merged = current.merged_with(&partial);

        self.remove_from_indexes_and_storage(id)?;
        self.insert(merged.clone(), true)?;
        Ok(merged)
    }

    /// Remove a record: drop it from the MemTable or rewrite its owning
    /// page without it, and remove it from every index.
    pub fn delete(&mut self, id: &str) -> DbResult<Record> {
        self.require_writable()?;
        let record = self
            .find(id)?
            .ok_or_else(|| DbError::NotFound(id.to_string()))?;
        self.remove_from_indexes_and_storage(id)?;
        Ok(record)
    }

    fn remove_from_indexes_and_storage(&mut self, id: &str) -> DbResult<()> {
        if self.memtable.remove(id).is_some() {
            // Never indexed (see module docs), so there is nothing to unindex.
            return Ok(());
        }

        let Some(page_id) = self.indexes.primary_lookup(id) else {
            return Ok(());
        };
        if let Some((slot, record)) = self.locate_slot(page_id, id)? {
            let rid = RecordId { page_id, slot };
            self.indexes.unindex_record(rid, &record)?;
            let page = self.cache.fetch_page_mut(page_id)?;
            page.delete_slot(slot)?;
            page.compact()?;
            self.cache.flush()?;
        }
        Ok(())
    }

    /// Iterate every live record: MemTable first (insertion order), then
    /// data pages in ascending page-id order, skipping tombstoned slots.
    pub fn select_all(&mut self) -> DbResult<Vec<(String, Record)>> {
        let mut out = Vec::new();
        let staged: Vec<(String, Vec<u8>)> = self
            .memtable
            .iter()
            .map(|(id, b)| (id.to_string(), b.to_vec()))
            .collect();
        for (id, bytes) in staged {
            out.push((id, decode_record(&self.meta, &bytes)?));
        }

        let num_pages = self.cache.num_pages()?;
        for page_num in FIRST_DATA_PAGE..num_pages {
            let page = self.cache.fetch_page(PageId(page_num))?;
            let header = page.header()?;
            for slot in 0..header.num_slots {
                let s = page.read_slot(slot)?;
                if s.is_empty() {
                    continue;
                }
                let start = s.offset as usize;
                let end = start + s.len as usize;
                let record = decode_record(&self.meta, &page.data[start..end])?;
                if let Some(id) = record.id() {
                    out.push((id.to_string(), record));
                }
            }
        }
        Ok(out)
    }

    fn scan_pages(cache: &mut PageCache, meta: &TableMeta) -> DbResult<Vec<(RecordId, Record)>> {
        let mut out = Vec::new();
        let num_pages = cache.num_pages()?;
        for page_num in FIRST_DATA_PAGE..num_pages {
            let page = cache.fetch_page(PageId(page_num))?;
            let header = page.header()?;
            for slot in 0..header.num_slots {
                let s = page.read_slot(slot)?;
                if s.is_empty() {
                    continue;
                }
                let start = s.offset as usize;
                let end = start + s.len as usize;
                let record = decode_record(meta, &page.data[start..end])?;
                out.push((
                    RecordId {
                        page_id: PageId(page_num),
                        slot,
                    },
                    record,
                ));
            }
        }
        Ok(out)
    }

    /// Resolve a list of B-tree/hash hits against storage.
    fn resolve_ids(&mut self, ids: &[RecordId]) -> DbResult<Vec<(String, Record)>> {
        let mut out = Vec::with_capacity(ids.len());
        for rid in ids {
            let page = self.cache.fetch_page(rid.page_id)?;
            let slot = page.read_slot(rid.slot)?;
            if slot.is_empty() {
                continue;
            }
            let start = slot.offset as usize;
            let end = start + slot.len as usize;
            let record = decode_record(&self.meta, &page.data[start..end])?;
            if let Some(id) = record.id() {
                out.push((id.to_string(), record));
            }
        }
        Ok(out)
    }

    /// Collect the not-yet-flushed records from the MemTable that satisfy
    /// `pred`, so index-routed or full-scan queries see an up-to-date view
    /// without forcing a flush.
    fn staged_matching(&self, field: &str, mut pred: impl FnMut(&Value) -> bool) -> DbResult<Vec<(String, Record)>> {
        let mut out = Vec::new();
        for (id, bytes) in self.memtable.iter() {
            let record = decode_record(&self.meta, bytes)?;
            if let Some(value) = record.get(field)
                && pred(value)
            {
                out.push((id.to_string(), record));
            }
        }
        Ok(out)
    }

    /// Full scan applying `pred` inline, including unflushed MemTable
    /// entries. Used as the fallback for every index-routed query below
    /// when `field` has no B-tree index.
    fn scan_matching(&mut self, field: &str, mut pred: impl FnMut(&Value) -> bool) -> DbResult<Vec<(String, Record)>> {
        let mut out = self.staged_matching(field, &mut pred)?;
        let num_pages = self.cache.num_pages()?;
        for page_num in FIRST_DATA_PAGE..num_pages {
            let page = self.cache.fetch_page(PageId(page_num))?;
            let header = page.header()?;
            for slot in 0..header.num_slots {
                let s = page.read_slot(slot)?;
                if s.is_empty() {
                    continue;
                }
                let start = s.offset as usize;
                let end = start + s.len as usize;
                let record = decode_record(&self.meta, &page.data[start..end])?;
                if let Some(value) = record.get(field)
                    && pred(value)
                    && let Some(id) = record.id()
                {
                    out.push((id.to_string(), record));
                }
            }
        }
        Ok(out)
    }

    /// Exact-match lookup over `field`. Uses the B-tree index when present
    /// (plus a MemTable check for unflushed matches), else a full scan.
    pub fn find_equals(&mut self, field: &str, value: &Value) -> DbResult<Vec<(String, Record)>> {
        if self.indexes.has_index(field) {
            let mut out = self.staged_matching(field, |v| v == value)?;
            let ids = self.indexes.btree(field).expect("checked above").search(value)?;
            out.extend(self.resolve_ids(&ids)?);
            return Ok(out);
        }
        self.scan_matching(field, |v| v == value)
    }

    /// Membership lookup over `field` against a set of candidate values.
    pub fn find_in(&mut self, field: &str, values: &[Value]) -> DbResult<Vec<(String, Record)>> {
        if self.indexes.has_index(field) {
            let mut out = self.staged_matching(field, |v| values.contains(v))?;
            let bt = self.indexes.btree(field).expect("checked above");
            let mut ids = Vec::new();
            for value in values {
                ids.extend(bt.search(value)?);
            }
            out.extend(self.resolve_ids(&ids)?);
            return Ok(out);
        }
        self.scan_matching(field, |v| values.contains(v))
    }

    pub fn find_gt(&mut self, field: &str, low: &Value) -> DbResult<Vec<(String, Record)>> {
        self.find_range(field, Some(low), None, false, false)
    }

    pub fn find_gte(&mut self, field: &str, low: &Value) -> DbResult<Vec<(String, Record)>> {
        self.find_range(field, Some(low), None, true, false)
    }

    pub fn find_lt(&mut self, field: &str, high: &Value) -> DbResult<Vec<(String, Record)>> {
        self.find_range(field, None, Some(high), false, false)
    }

    pub fn find_lte(&mut self, field: &str, high: &Value) -> DbResult<Vec<(String, Record)>> {
        self.find_range(field, None, Some(high), false, true)
    }

    fn range_pred(
        low: Option<&Value>,
        high: Option<&Value>,
        inclusive_low: bool,
        inclusive_high: bool,
    ) -> impl Fn(&Value) -> bool + '_ {
        move |v: &Value| -> bool {
            if let Some(lo) = low {
                let ord = v.cmp(lo);
                if inclusive_low {
                    if ord == std::cmp::Ordering::Less {
                        return false;
                    }
                } else if ord != std::cmp::Ordering::Greater {
                    return false;
                }
            }
            if let Some(hi) = high {
                let ord = v.cmp(hi);
                if inclusive_high {
                    if ord == std::cmp::Ordering::Greater {
                        return false;
                    }
                } else if ord != std::cmp::Ordering::Less {
                    return false;
                }
            }
            true
        }
    }

    /// Inclusive/exclusive range scan over `field`. Uses the B-tree index
    /// when present, else a full scan.
    pub fn find_range(
        &mut self,
        field: &str,
        low: Option<&Value>,
        high: Option<&Value>,
        inclusive_low: bool,
        inclusive_high: bool,
    ) -> DbResult<Vec<(String, Record)>> {
        if self.indexes.has_index(field) {
            let pred = Self::range_pred(low, high, inclusive_low, inclusive_high);
            let mut out = self.staged_matching(field, pred)?;
            let ids = self
                .indexes
                .btree(field)
                .expect("checked above")
                .find_range(low, high, inclusive_low, inclusive_high)?;
            out.extend(self.resolve_ids(&ids)?);
            return Ok(out);
        }
        let pred = Self::range_pred(low, high, inclusive_low, inclusive_high);
        self.scan_matching(field, pred)
    }

    /// If `field` is indexed, walk the B-tree in order and resolve each
    /// record, prepending any unflushed MemTable matches; else materialize
    /// a full scan and sort.
    pub fn select_all_sorted(&mut self, field: &str) -> DbResult<Vec<(String, Record)>> {
        if self.indexes.has_index(field) {
            let mut staged = self.staged_matching(field, |_| true)?;
            staged.sort_by(|(_, a), (_, b)| a.get(field).cmp(&b.get(field)));
            let mut out = staged;
            let entries = self.indexes.btree(field).expect("checked above").all_sorted()?;
            for (_, ids) in entries {
                out.extend(self.resolve_ids(&ids)?);
            }
            return Ok(out);
        }
        let mut all = self.select_all()?;
        all.sort_by(|(_, a), (_, b)| a.get(field).cmp(&b.get(field)));
        Ok(all)
    }

    /// Build and persist an index for `field` from every currently-flushed
    /// record. Records still staged in the MemTable are picked up the next
    /// time they flush.
    pub fn create_index(&mut self, field: &str, kind: IndexKind) -> DbResult<()> {
        self.require_writable()?;
        self.indexes.create_index(field, kind)?;
        if !self.meta.has_index(field) {
            self.meta.add_index(catalog::IndexMeta {
                field: field.to_string(),
                kind,
            })?;
        }

        let num_pages = self.cache.num_pages()?;
        for page_num in FIRST_DATA_PAGE..num_pages {
            let page = self.cache.fetch_page(PageId(page_num))?;
            let header = page.header()?;
            let mut hits = Vec::new();
            for slot in 0..header.num_slots {
                let s = page.read_slot(slot)?;
                if s.is_empty() {
                    continue;
                }
                let start = s.offset as usize;
                let end = start + s.len as usize;
                let record = decode_record(&self.meta, &page.data[start..end])?;
                if let Some(value) = record.get(field)
                    && !value.is_null()
                {
                    hits.push((
                        RecordId {
                            page_id: PageId(page_num),
                            slot,
                        },
                        value.clone(),
                    ));
                }
            }
            let bt = self.indexes.btree(field).expect("just created above");
            for (rid, value) in hits {
                bt.insert(value, rid)?;
            }
        }
        self.write_metadata()?;
        Ok(())
    }

    fn write_metadata(&mut self) -> DbResult<()> {
        let bytes = self.meta.encode()?;
        self.cache.write_metadata_page(&bytes)
    }

    /// Drain the MemTable into data pages, indexing each record under its
    /// final page-id, then persist metadata and indexes.
    ///
    /// A failure partway through re-stages every entry from the failing one
    /// onward back into the MemTable, so the on-disk state ends up with a
    /// prefix applied and the in-memory MemTable retains the unflushed
    /// suffix for the next flush to retry.
    pub fn flush_memtable(&mut self) -> DbResult<()> {
        self.require_writable()?;
        if self.memtable.is_empty() {
            return Ok(());
        }
        self.state = TableState::Flushing;

        let staged = self.memtable.drain_ordered();
        for (i, (_, bytes)) in staged.iter().enumerate() {
            if let Err(e) = self.flush_staged_tuple(bytes) {
                for (id, bytes) in &staged[i..] {
                    self.memtable.put(id.clone(), bytes.clone());
                }
                self.state = TableState::Open;
                return Err(e);
            }
        }

        self.cache.flush()?;
        self.write_metadata()?;
        self.indexes.save_all()?;
        self.state = TableState::Open;
        Ok(())
    }

    fn flush_staged_tuple(&mut self, bytes: &[u8]) -> DbResult<()> {
        let record = decode_record(&self.meta, bytes)?;
        let page_id = self.page_for_new_tuple(bytes.len())?;
        let page = self.cache.fetch_page_mut(page_id)?;
        let slot = page.append_tuple(bytes)?;
        let rid = RecordId { page_id, slot };
        self.indexes.index_record(rid, &record)
    }

    fn page_for_new_tuple(&mut self, payload_len: usize) -> DbResult<PageId> {
        let num_pages = self.cache.num_pages()?;
        if num_pages > FIRST_DATA_PAGE {
            let last = PageId(num_pages - 1);
            let page = self.cache.fetch_page(last)?;
            if page.can_fit(payload_len)? {
                return Ok(last);
            }
        }
        self.cache.allocate_page()
    }

    /// Flush, persist indexes and metadata, and mark the handle closed.
    /// Further writes fail with `DbError::Closed`.
    pub fn close(&mut self) -> DbResult<()> {
        if self.state == TableState::Closed {
            return Ok(());
        }
        self.flush_memtable()?;
        self.indexes.save_all()?;
        self.write_metadata()?;
        self.state = TableState::Closed;
        Ok(())
    }

    /// Widen this table's schema with any column or relation present in the
    /// latest SDL derivation but absent from the current metadata. Never
    /// reorders or drops an existing column — a column dropped from newer
    /// SDL is kept on disk as a legacy column (see DESIGN.md).
    pub fn widen_schema(&mut self, columns: &[catalog::Column], relations: &[catalog::RelationDescriptor]) -> DbResult<()> {
        self.require_writable()?;
        for column in columns {
            if !self.meta.has_column(&column.name) {
                self.meta.add_column(column.clone())?;
            }
        }
        for relation in relations {
            self.meta.add_relation(relation.clone());
        }
        self.write_metadata()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &TableMeta {
        &self.meta
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if self.state != TableState::Closed
            && let Err(e) = self.close()
        {
            warn!(table = %self.name, error = %e, "flush on drop failed");
        }
    }
}

/// A `Table` guarded by a reader-writer lock, for hosts that serve a table
/// to multiple callers concurrently. Every operation here takes the write
/// side: the page cache mutates its LRU state even on a cache-hit read,
/// modeled with `&mut self` throughout rather than interior mutability, so
/// a true shared-read path would need a different locking shape in
/// `buffer`. This is coarser than a full reader/writer split, but preserves
/// its safety property — concurrent writers are serialized, and no reader
/// ever observes a torn write.
#[derive(Clone)]
pub struct SharedTable(std::sync::Arc<std::sync::RwLock<Table>>);

impl SharedTable {
    pub fn new(table: Table) -> Self {
        Self(std::sync::Arc::new(std::sync::RwLock::new(table)))
    }

    /// Run `f` with exclusive access to the underlying `Table`.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Table) -> R) -> R {
        let mut guard = self.0.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}
