//! In-memory staging area for newly-written records, ahead of a page flush.
//!
//! Entries keep insertion order; `put` on an existing id overwrites its
//! bytes in place rather than moving it to the end, so a scan of the
//! MemTable reflects write order, not write recency.


use ahash::RandomState;
use hashbrown::HashMap;

/// Ordered `id -> encoded record` staging buffer.
#[derive(Debug)]
pub struct MemTable {
    order: Vec<String>,
    positions: HashMap<String, usize, RandomState>,
    values: Vec<Option<Vec<u8>>>,
    threshold: usize,
}

impl MemTable {
    pub fn new(threshold: usize) -> Self {
        Self {
            order: Vec::new(),
            positions: HashMap::default(),
            values: Vec::new(),
            threshold,
        }
    }

    /// Insert or overwrite `id`'s encoded bytes. Overwriting an existing id
    /// keeps its original position in iteration order.
    pub fn put(&mut self, id: impl Into<String>, bytes: Vec<u8>) {
        let id = id.into();
        if let Some(&pos) = self.positions.get(&id) {
            self.values[pos] = Some(bytes);
        } else {
            let pos = self.order.len();
            self.positions.insert(id.clone(), pos);
            self.order.push(id);
            self.values.push(Some(bytes));
        }
    }

    pub fn get(&self, id: &str) -> Option<&[u8]> {
        let pos = *self.positions.get(id)?;
        self.values[pos].as_deref()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    /// Remove `id`, returning its bytes if present. Leaves a hole in
    /// iteration order rather than shifting the remaining entries, so other
    /// entries' positions stay stable across removals.
    pub fn remove(&mut self, id: &str) -> Option<Vec<u8>> {
        let pos = self.positions.remove(id)?;
        self.values[pos].take()
    }

    /// Entries currently staged (excludes removed holes).
    pub fn size(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether the owning table should trigger a flush.
    pub fn should_flush(&self) -> bool {
        self.size() >= self.threshold
    }

    /// Iterate staged entries in insertion order, skipping removed holes.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.order
            .iter()
            .zip(self.values.iter())
            .filter_map(|(id, bytes)| bytes.as_deref().map(|b| (id.as_str(), b)))
    }

    /// Remove and return every staged entry in insertion order, leaving the
    /// MemTable empty. Used by `flush-to-pages`: on a partial failure the
    /// caller re-stages the unflushed suffix with `put`.
    pub fn drain_ordered(&mut self) -> Vec<(String, Vec<u8>)> {
        let order = std::mem::take(&mut self.order);
        let values = std::mem::take(&mut self.values);
        self.positions.clear();
        order
            .into_iter()
            .zip(values)
            .filter_map(|(id, bytes)| bytes.map(|b| (id, b)))
            .collect()
    }
}
