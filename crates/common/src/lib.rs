use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, io, path::PathBuf};
use thiserror::Error;
use types::Value;

/// Logical identifier for a page within a single table file.
/// Examples:
/// - `let metadata_page = PageId(0);`
/// - `let first_data_page = PageId(1);`
/// - `let index_root = PageId(0);` (inside an index sidecar)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u64);

/// A record's current storage location. Not part of a record's logical
/// value: callers never see this in a projected result.
/// Examples:
/// - `let loc = RecordId { page_id: PageId(1), slot: 0 };`
/// - `let loc = RecordId { page_id: PageId(42), slot: 255 };`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u16,
}

/// A logical record: an ordered mapping field-name -> value. The primary
/// key field is conventionally named `id`.
///
/// # Examples
/// - `let r = Record::new().with("id", Value::String("u1".into()));`
/// - `let r = Record::from_iter([("id", Value::String("u1".into())), ("age", Value::Int(30))]);`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.0.insert(field.into(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn id(&self) -> Option<&str> {
        self.get("id").and_then(Value::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Merge `other` on top of `self`, overwriting any shared fields. Used
    /// by `Table::update` to apply a partial record.
    pub fn merged_with(&self, other: &Record) -> Record {
        let mut merged = self.clone();
        for (k, v) in other.fields() {
            merged.set(k, v.clone());
        }
        merged
    }
}

impl FromIterator<(&'static str, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (&'static str, Value)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

/// Canonical error type shared across storage, schema, and resolver crates.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate id: {0}")]
    Duplicate(String),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("index missing: {0}")]
    IndexMissing(String),
    #[error("corrupt page: {0}")]
    CorruptPage(String),
    #[error("corrupt index: {0}")]
    CorruptIndex(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("metadata too large: {0} bytes (max {1})")]
    MetadataTooLarge(usize, usize),
    #[error("handle closed")]
    Closed,
    #[error("invalid: {0}")]
    Invalid(String),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for the storage engine.
///
/// # Example
/// ```
/// use common::StoreConfig;
/// use std::path::PathBuf;
///
/// let config = StoreConfig::builder()
///     .data_dir(PathBuf::from("./my_store"))
///     .cache_capacity_pages(256)
///     .memtable_threshold_records(500)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct StoreConfig {
    /// Directory where per-table files and index sidecars live.
    #[builder(default = PathBuf::from("./data"))]
    pub data_dir: PathBuf,
    /// Number of pages the page cache keeps resident, per table.
    #[builder(default = 100)]
    pub cache_capacity_pages: usize,
    /// MemTable entry count that triggers a flush.
    #[builder(default = 1000)]
    pub memtable_threshold_records: usize,
    /// B-tree fan-out (maximum keys per node).
    #[builder(default = 32)]
    pub btree_order: usize,
    /// Access count on an unindexed field before the optimizer creates an
    /// index. `0` disables dynamic indexing.
    #[builder(default = 3)]
    pub optimizer_threshold: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            cache_capacity_pages: 100,
            memtable_threshold_records: 1000,
            btree_order: 32,
            optimizer_threshold: 3,
        }
    }
}

pub const PAGE_SIZE: usize = 4096;

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{DbError, DbResult, PageId, Record, RecordId, StoreConfig, PAGE_SIZE};
    pub use types::{ScalarKind, Value};
}
