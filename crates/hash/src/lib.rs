//! Primary-key hash index: maps id strings to the page holding the record.
//!
//! Unlike the B-tree secondary indexes, this index does not need ordering or
//! range queries, so it is a single in-memory map with whole-file
//! serialization rather than a paged structure. The owning table's write lock
//! guards all mutation; this type has no internal locking of its own.

use ahash::RandomState;
use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DbError, DbResult, PageId};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

type Map = HashMap<String, PageId, RandomState>;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// A `key -> page-id` mapping for primary-key lookups.
#[derive(Debug, Default)]
pub struct HashIndex {
    map: Map,
}

/// On-disk shape. `PageId` isn't `Serialize` over a bare `u64` map key in
/// bincode's derived format, so the sidecar stores a plain vector of pairs.
#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    key: String,
    page_id: u64,
}

impl HashIndex {
    pub fn new() -> Self {
        Self { map: Map::default() }
    }

    /// Create an empty index file at `path`, overwriting any existing one.
    pub fn create(path: &Path) -> DbResult<Self> {
        let index = Self::new();
        index.flush(path)?;
        Ok(index)
    }

    /// Load an index previously written with [`HashIndex::flush`].
    pub fn open(path: &Path) -> DbResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Self::load(file)
    }

    pub fn put(&mut self, key: impl Into<String>, page_id: PageId) {
        self.map.insert(key.into(), page_id);
    }

    pub fn get(&self, key: &str) -> Option<PageId> {
        self.map.get(key).copied()
    }

    pub fn remove(&mut self, key: &str) -> Option<PageId> {
        self.map.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, PageId)> {
        self.map.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Serialize the whole mapping as a single blob.
    pub fn save<W: Write>(&self, mut writer: W) -> DbResult<()> {
        let entries: Vec<Entry> = self
            .map
            .iter()
            .map(|(key, page_id)| Entry {
                key: key.clone(),
                page_id: page_id.0,
            })
            .collect();
        let bytes = encode_to_vec(&entries, bincode_config())
            .map_err(|e| DbError::CorruptIndex(format!("failed to encode hash index: {e}")))?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Deserialize a mapping previously written by [`HashIndex::save`].
    pub fn load<R: Read>(mut reader: R) -> DbResult<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let (entries, _): (Vec<Entry>, usize) = decode_from_slice(&bytes, bincode_config())
            .map_err(|e| DbError::CorruptIndex(format!("failed to decode hash index: {e}")))?;
        let map = entries
            .into_iter()
            .map(|e| (e.key, PageId(e.page_id)))
            .collect();
        Ok(Self { map })
    }

    /// Convenience: write the whole index to `path` in one call.
    pub fn flush(&self, path: &Path) -> DbResult<()> {
        let file = File::create(path)?;
        self.save(file)
    }
}

#[cfg(test)]
mod tests;
