//! Order-m B-tree secondary index, persisted as a metadata page followed by
//! node pages.
//!
//! Keys are single `Value`s of the column's declared scalar type. Duplicate
//! keys accumulate their record ids in one leaf entry rather than producing
//! one entry per insert.

mod node;

pub use node::{BTreeNode, NodeType};

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DbError, DbResult, PageId, RecordId};
use serde::{Deserialize, Serialize};
use storage::PAGE_SIZE;
use types::Value;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Default fan-out when a caller does not specify one. Mirrors
/// `common::StoreConfig::btree_order`'s own default so a standalone index
/// behaves the same as one created through a `Table`.
pub const DEFAULT_ORDER: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BTreeHeader {
    field: String,
    order: usize,
    root_page_id: u64,
    num_pages: u64,
}

/// A persistent order-m B-tree over a single indexed field.
#[derive(Debug)]
pub struct BTreeIndex {
    pub field: String,
    order: usize,
    root_page_id: PageId,
    file: File,
    num_pages: u64,
}

impl BTreeIndex {
    pub fn create(path: &Path, field: impl Into<String>, order: usize) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut index = Self {
            field: field.into(),
            order,
            root_page_id: PageId(0),
            file,
            num_pages: 1, // page 0 reserved for the header
        };

        let root_page = index.allocate_page()?;
        index.write_node(root_page, &BTreeNode::new_leaf())?;
        index.root_page_id = root_page;
        index.write_header()?;

        Ok(index)
    }

    pub fn open(path: &Path) -> DbResult<Self> {
        if !path.exists() {
            return Err(DbError::IndexMissing(format!(
                "index file does not exist: {}",
                path.display()
            )));
        }

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut buf = vec![0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;
        let (header, _): (BTreeHeader, usize) = decode_from_slice(&buf, bincode_config())
            .map_err(|e| DbError::CorruptIndex(format!("bad btree header: {e}")))?;

        Ok(Self {
            field: header.field,
            order: header.order,
            root_page_id: PageId(header.root_page_id),
            file,
            num_pages: header.num_pages,
        })
    }

    fn min_keys(&self) -> usize {
        self.order.div_ceil(2)
    }

    pub fn search(&mut self, key: &Value) -> DbResult<Vec<RecordId>> {
        let leaf_id = self.find_leaf(self.root_page_id, key)?;
        match self.read_node(leaf_id)? {
            BTreeNode::Leaf { entries, .. } => Ok(entries
                .into_iter()
                .find(|(k, _)| k == key)
                .map(|(_, ids)| ids)
                .unwrap_or_default()),
            BTreeNode::Internal { .. } => Err(DbError::CorruptIndex("expected leaf".into())),
        }
    }

    /// Inclusive/exclusive range scan. `low`/`high` of `None` means
    /// unbounded on that side.
    pub fn find_range(
        &mut self,
        low: Option<&Value>,
        high: Option<&Value>,
        incl_low: bool,
        incl_high: bool,
    ) -> DbResult<Vec<RecordId>> {
        let start = match low {
            Some(key) => self.find_leaf(self.root_page_id, key)?,
            None => self.leftmost_leaf()?,
        };

        let mut results = Vec::new();
        let mut current = Some(start);
        while let Some(page_id) = current {
            let (entries, next) = match self.read_node(page_id)? {
                BTreeNode::Leaf { entries, next_leaf } => (entries, next_leaf),
                BTreeNode::Internal { .. } => {
                    return Err(DbError::CorruptIndex("expected leaf in range scan".into()));
                }
            };

            let mut exhausted = false;
            for (key, ids) in &entries {
                if let Some(lo) = low {
                    let below = if incl_low { key < lo } else { key <= lo };
                    if below {
                        continue;
                    }
                }
                if let Some(hi) = high {
                    let past = if incl_high { key > hi } else { key >= hi };
                    if past {
                        exhausted = true;
                        break;
                    }
                }
                results.extend(ids.iter().copied());
            }

            if exhausted {
                break;
            }
            current = next;
        }

        Ok(results)
    }

    pub fn find_gt(&mut self, key: &Value) -> DbResult<Vec<RecordId>> {
        self.find_range(Some(key), None, false, false)
    }

    pub fn find_gte(&mut self, key: &Value) -> DbResult<Vec<RecordId>> {
        self.find_range(Some(key), None, true, false)
    }

    pub fn find_lt(&mut self, key: &Value) -> DbResult<Vec<RecordId>> {
        self.find_range(None, Some(key), false, false)
    }

    pub fn find_lte(&mut self, key: &Value) -> DbResult<Vec<RecordId>> {
        self.find_range(None, Some(key), false, true)
    }

    pub fn all_sorted(&mut self) -> DbResult<Vec<(Value, Vec<RecordId>)>> {
        let mut results = Vec::new();
        let mut current = Some(self.leftmost_leaf()?);
        while let Some(page_id) = current {
            match self.read_node(page_id)? {
                BTreeNode::Leaf { entries, next_leaf } => {
                    results.extend(entries);
                    current = next_leaf;
                }
                BTreeNode::Internal { .. } => {
                    return Err(DbError::CorruptIndex("expected leaf in scan".into()));
                }
            }
        }
        Ok(results)
    }

    pub fn insert(&mut self, key: Value, rid: RecordId) -> DbResult<()> {
        if let Some((split_key, new_child)) = self.insert_recursive(self.root_page_id, key, rid)? {
            let new_root = self.allocate_page()?;
            self.write_node(
                new_root,
                &BTreeNode::new_internal(vec![split_key], vec![self.root_page_id, new_child]),
            )?;
            self.root_page_id = new_root;
        }
        Ok(())
    }

    pub fn delete(&mut self, key: &Value, rid: RecordId) -> DbResult<bool> {
        let path = self.path_to_leaf(key)?;
        let leaf_id = *path.last().expect("path always has at least the leaf");

        let mut leaf = self.read_node(leaf_id)?;
        let deleted = match &mut leaf {
            BTreeNode::Leaf { entries, .. } => {
                if let Some(pos) = entries.iter().position(|(k, _)| k == key) {
                    let ids = &mut entries[pos].1;
                    let before = ids.len();
                    ids.retain(|r| r != &rid);
                    let removed = ids.len() < before;
                    if ids.is_empty() {
                        entries.remove(pos);
                    }
                    removed
                } else {
                    false
                }
            }
            BTreeNode::Internal { .. } => unreachable!("path always ends at a leaf"),
        };

        if !deleted {
            return Ok(false);
        }
        self.write_node(leaf_id, &leaf)?;
        self.fix_underflow(&path)?;
        self.write_header()?;
        Ok(true)
    }

    pub fn flush(&mut self) -> DbResult<()> {
        self.write_header()?;
        self.file.flush()?;
        Ok(())
    }

    // ---- descent helpers ----

    fn find_leaf(&mut self, start: PageId, key: &Value) -> DbResult<PageId> {
        let mut current = start;
        loop {
            match self.read_node(current)? {
                BTreeNode::Internal { keys, children } => {
                    let idx = keys.partition_point(|k| k <= key);
                    current = children[idx];
                }
                BTreeNode::Leaf { .. } => return Ok(current),
            }
        }
    }

    fn leftmost_leaf(&mut self) -> DbResult<PageId> {
        let mut current = self.root_page_id;
        loop {
            match self.read_node(current)? {
                BTreeNode::Internal { children, .. } => {
                    current = *children.first().ok_or_else(|| {
                        DbError::CorruptIndex("internal node has no children".into())
                    })?;
                }
                BTreeNode::Leaf { .. } => return Ok(current),
            }
        }
    }

    /// Root-to-leaf page id path for `key`, used by delete to walk back up
    /// and repair underflow.
    fn path_to_leaf(&mut self, key: &Value) -> DbResult<Vec<PageId>> {
        let mut path = vec![self.root_page_id];
        loop {
            let current = *path.last().unwrap();
            match self.read_node(current)? {
                BTreeNode::Internal { keys, children } => {
                    let idx = keys.partition_point(|k| k <= key);
                    path.push(children[idx]);
                }
                BTreeNode::Leaf { .. } => return Ok(path),
            }
        }
    }

    // ---- insert ----

    fn insert_recursive(
        &mut self,
        page_id: PageId,
        key: Value,
        rid: RecordId,
    ) -> DbResult<Option<(Value, PageId)>> {
        match self.read_node(page_id)? {
            BTreeNode::Internal { keys, children } => {
                let idx = keys.partition_point(|k| *k <= key);
                let child = children[idx];
                let split = self.insert_recursive(child, key, rid)?;

                let Some((new_key, new_child)) = split else {
                    return Ok(None);
                };

                let mut keys = keys;
                let mut children = children;
                keys.insert(idx, new_key);
                children.insert(idx + 1, new_child);

                if keys.len() > self.order {
                    let (left, split_key, right) = Self::split_internal(keys, children);
                    self.write_node(page_id, &left)?;
                    let right_page = self.allocate_page()?;
                    self.write_node(right_page, &right)?;
                    Ok(Some((split_key, right_page)))
                } else {
                    self.write_node(page_id, &BTreeNode::Internal { keys, children })?;
                    Ok(None)
                }
            }
            BTreeNode::Leaf {
                mut entries,
                next_leaf,
            } => {
                match entries.iter().position(|(k, _)| *k == key) {
                    Some(pos) => entries[pos].1.push(rid),
                    None => {
                        let idx = entries.partition_point(|(k, _)| *k <= key);
                        entries.insert(idx, (key, vec![rid]));
                    }
                }

                if entries.len() > self.order {
                    let (left, right, split_key) = Self::split_leaf(entries);
                    let right_page = self.allocate_page()?;
                    self.write_node(
                        page_id,
                        &BTreeNode::Leaf {
                            entries: left,
                            next_leaf: Some(right_page),
                        },
                    )?;
                    self.write_node(
                        right_page,
                        &BTreeNode::Leaf {
                            entries: right,
                            next_leaf,
                        },
                    )?;
                    Ok(Some((split_key, right_page)))
                } else {
                    self.write_node(page_id, &BTreeNode::Leaf { entries, next_leaf })?;
                    Ok(None)
                }
            }
        }
    }

    fn split_leaf(entries: Vec<(Value, Vec<RecordId>)>) -> (Vec<(Value, Vec<RecordId>)>, Vec<(Value, Vec<RecordId>)>, Value) {
        let mid = entries.len() / 2;
        let mut entries = entries;
        let right = entries.split_off(mid);
        let split_key = right[0].0.clone();
        (entries, right, split_key)
    }

    fn split_internal(
        keys: Vec<Value>,
        children: Vec<PageId>,
    ) -> (BTreeNode, Value, BTreeNode) {
        let mid = keys.len() / 2;
        let mut keys = keys;
        let mut children = children;
        let right_keys = keys.split_off(mid + 1);
        let split_key = keys.remove(mid);
        let right_children = children.split_off(mid + 1);

        (
            BTreeNode::Internal { keys, children },
            split_key,
            BTreeNode::Internal {
                keys: right_keys,
                children: right_children,
            },
        )
    }

    // ---- delete / rebalance ----

    fn fix_underflow(&mut self, path: &[PageId]) -> DbResult<()> {
        let min_keys = self.min_keys();
        let mut idx = path.len() - 1;

        loop {
            let page_id = path[idx];
            let node = self.read_node(page_id)?;
            let is_root = idx == 0;

            if node.len() >= min_keys {
                return Ok(());
            }
            if is_root {
                if let BTreeNode::Internal { keys, children } = &node {
                    if keys.is_empty() && children.len() == 1 {
                        self.root_page_id = children[0];
                    }
                }
                return Ok(());
            }

            let parent_id = path[idx - 1];
            let mut parent = self.read_node(parent_id)?;
            let BTreeNode::Internal {
                keys: pkeys,
                children: pchildren,
            } = &mut parent
            else {
                return Err(DbError::CorruptIndex("parent is not internal".into()));
            };
            let child_pos = pchildren
                .iter()
                .position(|&c| c == page_id)
                .ok_or_else(|| DbError::CorruptIndex("child not found in parent".into()))?;

            let merged = self.rebalance(
                node,
                pkeys,
                pchildren,
                child_pos,
                min_keys,
            )?;
            self.write_node(parent_id, &parent)?;

            if !merged {
                return Ok(());
            }
            // Parent lost a key; check it for underflow next.
            idx -= 1;
        }
    }

    /// Attempts to borrow a key/child from a sibling; if neither sibling has
    /// a surplus, merges with one and returns `true` so the caller re-checks
    /// the parent for underflow.
    fn rebalance(
        &mut self,
        node: BTreeNode,
        pkeys: &mut Vec<Value>,
        pchildren: &mut Vec<PageId>,
        child_pos: usize,
        min_keys: usize,
    ) -> DbResult<bool> {
        let left_sibling = child_pos.checked_sub(1).map(|i| pchildren[i]);
        let right_sibling = pchildren.get(child_pos + 1).copied();

        if let Some(left_id) = left_sibling {
            let left = self.read_node(left_id)?;
            if left.len() > min_keys {
                self.borrow_from_left(node, left, left_id, pchildren[child_pos], pkeys, child_pos - 1)?;
                return Ok(false);
            }
        }
        if let Some(right_id) = right_sibling {
            let right = self.read_node(right_id)?;
            if right.len() > min_keys {
                self.borrow_from_right(node, right, pchildren[child_pos], right_id, pkeys, child_pos)?;
                return Ok(false);
            }
        }

        if let Some(left_id) = left_sibling {
            let left = self.read_node(left_id)?;
            self.merge(left, left_id, node, pchildren[child_pos], pkeys, pchildren, child_pos - 1)?;
        } else if let Some(right_id) = right_sibling {
            self.merge(node, pchildren[child_pos], self.read_node(right_id)?, right_id, pkeys, pchildren, child_pos)?;
        } else {
            return Err(DbError::CorruptIndex("underflowing node has no siblings".into()));
        }
        Ok(true)
    }

    fn borrow_from_left(
        &mut self,
        node: BTreeNode,
        left: BTreeNode,
        left_id: PageId,
        node_id: PageId,
        pkeys: &mut [Value],
        separator_idx: usize,
    ) -> DbResult<()> {
        match (left, node) {
            (
                BTreeNode::Leaf {
                    entries: mut left_entries,
                    next_leaf: left_next,
                },
                BTreeNode::Leaf {
                    entries: mut entries,
                    next_leaf,
                },
            ) => {
                let borrowed = left_entries.pop().unwrap();
                entries.insert(0, borrowed);
                pkeys[separator_idx] = entries[0].0.clone();
                self.write_node(
                    left_id,
                    &BTreeNode::Leaf {
                        entries: left_entries,
                        next_leaf: left_next,
                    },
                )?;
                self.write_node(node_id, &BTreeNode::Leaf { entries, next_leaf })?;
            }
            (
                BTreeNode::Internal {
                    keys: mut left_keys,
                    children: mut left_children,
                },
                BTreeNode::Internal {
                    mut keys,
                    mut children,
                },
            ) => {
                let borrowed_child = left_children.pop().unwrap();
                let borrowed_key = left_keys.pop().unwrap();
                keys.insert(0, pkeys[separator_idx].clone());
                children.insert(0, borrowed_child);
                pkeys[separator_idx] = borrowed_key;
                self.write_node(
                    left_id,
                    &BTreeNode::Internal {
                        keys: left_keys,
                        children: left_children,
                    },
                )?;
                self.write_node(node_id, &BTreeNode::Internal { keys, children })?;
            }
            _ => return Err(DbError::CorruptIndex("sibling node-type mismatch".into())),
        }
        Ok(())
    }

    fn borrow_from_right(
        &mut self,
        node: BTreeNode,
        right: BTreeNode,
        node_id: PageId,
        right_id: PageId,
        pkeys: &mut [Value],
        separator_idx: usize,
    ) -> DbResult<()> {
        match (node, right) {
            (
                BTreeNode::Leaf {
                    entries: mut entries,
                    next_leaf,
                },
                BTreeNode::Leaf {
                    entries: mut right_entries,
                    next_leaf: right_next,
                },
            ) => {
                let borrowed = right_entries.remove(0);
                entries.push(borrowed);
                pkeys[separator_idx] = right_entries[0].0.clone();
                self.write_node(node_id, &BTreeNode::Leaf { entries, next_leaf })?;
                self.write_node(
                    right_id,
                    &BTreeNode::Leaf {
                        entries: right_entries,
                        next_leaf: right_next,
                    },
                )?;
            }
            (
                BTreeNode::Internal {
                    mut keys,
                    mut children,
                },
                BTreeNode::Internal {
                    keys: mut right_keys,
                    children: mut right_children,
                },
            ) => {
                let borrowed_child = right_children.remove(0);
                let borrowed_key = right_keys.remove(0);
                keys.push(pkeys[separator_idx].clone());
                children.push(borrowed_child);
                pkeys[separator_idx] = borrowed_key;
                self.write_node(node_id, &BTreeNode::Internal { keys, children })?;
                self.write_node(
                    right_id,
                    &BTreeNode::Internal {
                        keys: right_keys,
                        children: right_children,
                    },
                )?;
            }
            _ => return Err(DbError::CorruptIndex("sibling node-type mismatch".into())),
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn merge(
        &mut self,
        left: BTreeNode,
        left_id: PageId,
        right: BTreeNode,
        right_id: PageId,
        pkeys: &mut Vec<Value>,
        pchildren: &mut Vec<PageId>,
        separator_idx: usize,
    ) -> DbResult<()> {
        match (left, right) {
            (
                BTreeNode::Leaf {
                    entries: mut left_entries,
                    ..
                },
                BTreeNode::Leaf {
                    entries: right_entries,
                    next_leaf: right_next,
                },
            ) => {
                left_entries.extend(right_entries);
                self.write_node(
                    left_id,
                    &BTreeNode::Leaf {
                        entries: left_entries,
                        next_leaf: right_next,
                    },
                )?;
            }
            (
                BTreeNode::Internal {
                    keys: mut left_keys,
                    children: mut left_children,
                },
                BTreeNode::Internal {
                    keys: right_keys,
                    children: right_children,
                },
            ) => {
                left_keys.push(pkeys[separator_idx].clone());
                left_keys.extend(right_keys);
                left_children.extend(right_children);
                self.write_node(
                    left_id,
                    &BTreeNode::Internal {
                        keys: left_keys,
                        children: left_children,
                    },
                )?;
            }
            _ => return Err(DbError::CorruptIndex("sibling node-type mismatch".into())),
        }
        pkeys.remove(separator_idx);
        pchildren.remove(separator_idx + 1);
        let _ = right_id;
        Ok(())
    }

    // ---- page I/O ----

    fn allocate_page(&mut self) -> DbResult<PageId> {
        let page_id = PageId(self.num_pages);
        self.num_pages += 1;
        let offset = page_id.0 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&[0u8; PAGE_SIZE])?;
        Ok(page_id)
    }

    fn read_node(&mut self, page_id: PageId) -> DbResult<BTreeNode> {
        let offset = page_id.0 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; PAGE_SIZE];
        self.file.read_exact(&mut buffer)?;
        let (node, _): (BTreeNode, usize) = decode_from_slice(&buffer, bincode_config())
            .map_err(|e| DbError::CorruptIndex(format!("failed to decode btree node: {e}")))?;
        Ok(node)
    }

    fn write_node(&mut self, page_id: PageId, node: &BTreeNode) -> DbResult<()> {
        let bytes = encode_to_vec(node, bincode_config())
            .map_err(|e| DbError::CorruptIndex(format!("failed to encode btree node: {e}")))?;
        if bytes.len() > PAGE_SIZE {
            return Err(DbError::CorruptIndex(format!(
                "btree node too large: {} bytes (max {PAGE_SIZE})",
                bytes.len()
            )));
        }
        let mut buffer = vec![0u8; PAGE_SIZE];
        buffer[..bytes.len()].copy_from_slice(&bytes);
        let offset = page_id.0 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&buffer)?;
        Ok(())
    }

    fn write_header(&mut self) -> DbResult<()> {
        let header = BTreeHeader {
            field: self.field.clone(),
            order: self.order,
            root_page_id: self.root_page_id.0,
            num_pages: self.num_pages,
        };
        let bytes = encode_to_vec(&header, bincode_config())
            .map_err(|e| DbError::CorruptIndex(format!("failed to encode header: {e}")))?;
        if bytes.len() > PAGE_SIZE {
            return Err(DbError::MetadataTooLarge(bytes.len(), PAGE_SIZE));
        }
        let mut buffer = vec![0u8; PAGE_SIZE];
        buffer[..bytes.len()].copy_from_slice(&bytes);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buffer)?;
        Ok(())
    }
}
