//! Owns a table's primary hash index plus its secondary B-tree indexes,
//! keyed by column name.
//!
//! Secondary indexes are always B-tree backed, regardless of the declared
//! `IndexKind`: a field's values are not guaranteed unique, and only the
//! B-tree's per-key record-id list supports that. `IndexKind::Hash` names
//! the table's always-present primary index, which this manager keeps
//! separate precisely because it *is* single-valued by construction.

#[cfg(test)]
mod tests;

use ahash::RandomState;
use btree::BTreeIndex;
use catalog::{IndexKind, TableMeta};
use common::{DbError, DbResult, PageId, Record, RecordId};
use hash::HashIndex;
use hashbrown::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

fn sidecar_dir(table_dir: &Path, table_name: &str) -> PathBuf {
    table_dir.join(format!("{table_name}_indexes"))
}

fn primary_path(table_dir: &Path, table_name: &str) -> PathBuf {
    sidecar_dir(table_dir, table_name).join("_primary.idx")
}

fn secondary_path(table_dir: &Path, table_name: &str, field: &str) -> PathBuf {
    sidecar_dir(table_dir, table_name).join(format!("{field}.idx"))
}

/// Manages the lifetime of one table's indexes: the primary id-to-page
/// lookup and every secondary column index.
pub struct IndexManager {
    table_dir: PathBuf,
    table_name: String,
    btree_order: usize,
    primary: HashIndex,
    secondary: HashMap<String, BTreeIndex, RandomState>,
}

/// Columns whose sidecar failed to load cleanly and must be rebuilt from a
/// page scan before the table is usable.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RebuildPlan {
    pub primary: bool,
    pub secondary: Vec<String>,
}

impl IndexManager {
    /// Create a brand-new, empty index set for a freshly-created table.
    pub fn create_fresh(table_dir: &Path, table_name: &str, btree_order: usize) -> DbResult<Self> {
        fs::create_dir_all(sidecar_dir(table_dir, table_name))?;
        let primary = HashIndex::create(&primary_path(table_dir, table_name))?;
        Ok(Self {
            table_dir: table_dir.to_path_buf(),
            table_name: table_name.to_string(),
            btree_order,
            primary,
            secondary: HashMap::default(),
        })
    }

    /// Open a table's index set, adopting every sidecar that parses cleanly.
    /// Sidecars that fail to decode are reported in the returned
    /// [`RebuildPlan`] rather than surfaced as an error.
    pub fn load(
        table_dir: &Path,
        table_name: &str,
        meta: &TableMeta,
        btree_order: usize,
    ) -> DbResult<(Self, RebuildPlan)> {
        fs::create_dir_all(sidecar_dir(table_dir, table_name))?;
        let mut plan = RebuildPlan::default();

        let primary = match HashIndex::open(&primary_path(table_dir, table_name)) {
            Ok(idx) => idx,
            Err(_) => {
                plan.primary = true;
                HashIndex::new()
            }
        };

        let mut secondary = HashMap::default();
        for index_meta in &meta.indexes {
            match BTreeIndex::open(&secondary_path(table_dir, table_name, &index_meta.field)) {
                Ok(bt) => {
                    secondary.insert(index_meta.field.clone(), bt);
                }
                Err(_) => plan.secondary.push(index_meta.field.clone()),
            }
        }

        Ok((
            Self {
                table_dir: table_dir.to_path_buf(),
                table_name: table_name.to_string(),
                btree_order,
                primary,
                secondary,
            },
            plan,
        ))
    }

    pub fn has_index(&self, field: &str) -> bool {
        self.secondary.contains_key(field)
    }

    /// Idempotent: a repeat call for an already-indexed column is a no-op.
    pub fn create_index(&mut self, field: &str, _kind: IndexKind) -> DbResult<()> {
        if self.secondary.contains_key(field) {
            return Ok(());
        }
        let path = secondary_path(&self.table_dir, &self.table_name, field);
        let bt = BTreeIndex::create(&path, field, self.btree_order)?;
        self.secondary.insert(field.to_string(), bt);
        Ok(())
    }

    pub fn drop_index(&mut self, field: &str) -> DbResult<()> {
        if self.secondary.remove(field).is_some() {
            let path = secondary_path(&self.table_dir, &self.table_name, field);
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn btree(&mut self, field: &str) -> Option<&mut BTreeIndex> {
        self.secondary.get_mut(field)
    }

    pub fn primary_lookup(&self, id: &str) -> Option<PageId> {
        self.primary.get(id)
    }

    /// Index a newly-placed record: primary `id -> page`, plus every
    /// secondary index whose column has a non-null value on this record.
    /// Null values are never indexed.
    pub fn index_record(&mut self, rid: RecordId, record: &Record) -> DbResult<()> {
        let id = record
            .id()
            .ok_or_else(|| DbError::Invalid("record has no id field".into()))?;
        self.primary.put(id, rid.page_id);
        for (field, bt) in self.secondary.iter_mut() {
            if let Some(value) = record.get(field)
                && !value.is_null()
            {
                bt.insert(value.clone(), rid)?;
            }
        }
        Ok(())
    }

    /// Remove a record from the primary index and every secondary index
    /// whose column had a non-null value on it.
    pub fn unindex_record(&mut self, rid: RecordId, record: &Record) -> DbResult<()> {
        if let Some(id) = record.id() {
            self.primary.remove(id);
        }
        for (field, bt) in self.secondary.iter_mut() {
            if let Some(value) = record.get(field)
                && !value.is_null()
            {
                bt.delete(value, rid)?;
            }
        }
        Ok(())
    }

    /// Rebuild every index named in `plan` by replaying `records`.
    pub fn rebuild<'a>(
        &mut self,
        plan: &RebuildPlan,
        records: impl Iterator<Item = (RecordId, &'a Record)> + Clone,
    ) -> DbResult<()> {
        if plan.primary {
            self.primary = HashIndex::new();
        }
        for field in &plan.secondary {
            let path = secondary_path(&self.table_dir, &self.table_name, field);
            let bt = BTreeIndex::create(&path, field, self.btree_order)?;
            self.secondary.insert(field.clone(), bt);
        }

        if !plan.primary && plan.secondary.is_empty() {
            return Ok(());
        }

        for (rid, record) in records {
            if plan.primary
                && let Some(id) = record.id()
            {
                self.primary.put(id, rid.page_id);
            }
            for field in &plan.secondary {
                if let Some(value) = record.get(field)
                    && !value.is_null()
                {
                    self.btree(field).expect("just created above").insert(value.clone(), rid)?;
                }
            }
        }
        Ok(())
    }

    pub fn save_all(&mut self) -> DbResult<()> {
        self.primary.flush(&primary_path(&self.table_dir, &self.table_name))?;
        for bt in self.secondary.values_mut() {
            bt.flush()?;
        }
        Ok(())
    }

    pub fn secondary_fields(&self) -> impl Iterator<Item = &str> {
        self.secondary.keys().map(|s| s.as_str())
    }
}
