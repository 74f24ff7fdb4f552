use ahash::RandomState;
use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DbError, DbResult, PAGE_SIZE};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use types::ScalarKind;

type Map<K, V> = HashMap<K, V, RandomState>;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// How a relation field on one table reaches another table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    /// This table holds the foreign key; the field resolves to one record.
    BelongsTo,
    /// The related table holds the foreign key that points back here.
    HasMany,
}

/// A relation field declared on a table, as derived from its GraphQL type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub field: String,
    pub kind: RelationKind,
    pub related_table: String,
    pub foreign_key_field: String,
}

/// A single scalar or list-of-scalar column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ScalarKind,
    pub nullable: bool,
    pub is_list: bool,
    /// Present when this column's declared type is a GraphQL enum, so the
    /// resolver can validate and publish it distinctly from a plain string.
    pub enum_name: Option<String>,
}

impl Column {
    pub fn scalar(name: impl Into<String>, kind: ScalarKind, nullable: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable,
            is_list: false,
            enum_name: None,
        }
    }
}

/// Which index implementation backs a secondary index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    Hash,
    BTree,
}

/// A secondary index over a single field, distinct from the table's
/// always-present primary hash index on `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub field: String,
    pub kind: IndexKind,
}

/// Schema and relation metadata for one table. One `TableMeta` lives on page
/// 0 of its table's file; `Table` decodes it on open and re-encodes it on
/// every metadata-affecting change (index creation, column addition).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key_field: String,
    pub relations: Vec<RelationDescriptor>,
    pub indexes: Vec<IndexMeta>,
    #[serde(skip)]
    #[serde(default)]
    name_to_ordinal: Map<String, usize>,
}

impl TableMeta {
    pub fn try_new(
        name: impl Into<String>,
        columns: Vec<Column>,
        primary_key_field: impl Into<String>,
    ) -> DbResult<Self> {
        let name = name.into();
        let primary_key_field = primary_key_field.into();
        if columns.is_empty() {
            return Err(DbError::SchemaMismatch(format!(
                "table '{name}' must declare at least one column"
            )));
        }
        let mut name_to_ordinal = Map::default();
        for (idx, column) in columns.iter().enumerate() {
            if name_to_ordinal.insert(column.name.clone(), idx).is_some() {
                return Err(DbError::SchemaMismatch(format!(
                    "duplicate column '{}' on table '{name}'",
                    column.name
                )));
            }
        }
        if !name_to_ordinal.contains_key(&primary_key_field) {
            return Err(DbError::SchemaMismatch(format!(
                "table '{name}' has no column for declared primary key '{primary_key_field}'"
            )));
        }
        Ok(Self {
            name,
            columns,
            primary_key_field,
            relations: Vec::new(),
            indexes: Vec::new(),
            name_to_ordinal,
        })
    }

    pub fn with_relations(mut self, relations: Vec<RelationDescriptor>) -> Self {
        self.relations = relations;
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.name_to_ordinal
            .get(name)
            .and_then(|&idx| self.columns.get(idx))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.name_to_ordinal.contains_key(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn relation(&self, field: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.field == field)
    }

    /// Append a column derived from a newer schema revision. Used by the
    /// schema loader's reopen path, which only ever widens a table's column
    /// list — existing columns are never reordered or removed.
    pub fn add_column(&mut self, column: Column) -> DbResult<()> {
        if self.has_column(&column.name) {
            return Err(DbError::Invalid(format!(
                "column '{}' already exists on table '{}'",
                column.name, self.name
            )));
        }
        let idx = self.columns.len();
        self.name_to_ordinal.insert(column.name.clone(), idx);
        self.columns.push(column);
        Ok(())
    }

    /// Record a relation field from a newer schema revision if not already
    /// present, keyed by field name (mirrors `add_column`'s add-only policy).
    pub fn add_relation(&mut self, relation: RelationDescriptor) {
        if !self.relations.iter().any(|r| r.field == relation.field) {
            self.relations.push(relation);
        }
    }

    pub fn add_index(&mut self, index: IndexMeta) -> DbResult<()> {
        if !self.has_column(&index.field) {
            return Err(DbError::SchemaMismatch(format!(
                "cannot index unknown field '{}' on table '{}'",
                index.field, self.name
            )));
        }
        if self.has_index(&index.field) {
            return Err(DbError::Invalid(format!(
                "field '{}' is already indexed on table '{}'",
                index.field, self.name
            )));
        }
        self.indexes.push(index);
        Ok(())
    }

    pub fn remove_index(&mut self, field: &str) -> DbResult<()> {
        let before = self.indexes.len();
        self.indexes.retain(|i| i.field != field);
        if self.indexes.len() == before {
            return Err(DbError::IndexMissing(format!(
                "no index on field '{field}' for table '{}'",
                self.name
            )));
        }
        Ok(())
    }

    pub fn has_index(&self, field: &str) -> bool {
        self.indexes.iter().any(|i| i.field == field)
    }

    pub fn index(&self, field: &str) -> Option<&IndexMeta> {
        self.indexes.iter().find(|i| i.field == field)
    }

    /// Encode this metadata into the fixed-size page-0 layout. Fails with
    /// `MetadataTooLarge` rather than silently truncating: schema growth
    /// (new columns, new indexes) must be validated before it is
    /// committed to disk.
    pub fn encode(&self) -> DbResult<Vec<u8>> {
        let bytes = encode_to_vec(self, bincode_config())
            .map_err(|e| DbError::CorruptPage(format!("encode table metadata failed: {e}")))?;
        if bytes.len() > PAGE_SIZE {
            return Err(DbError::MetadataTooLarge(bytes.len(), PAGE_SIZE));
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> DbResult<Self> {
        let (mut meta, _): (TableMeta, usize) = decode_from_slice(bytes, bincode_config())
            .map_err(|e| DbError::CorruptPage(format!("decode table metadata failed: {e}")))?;
        meta.rebuild_lookup();
        Ok(meta)
    }

    fn rebuild_lookup(&mut self) {
        self.name_to_ordinal.clear();
        for (idx, column) in self.columns.iter().enumerate() {
            self.name_to_ordinal.insert(column.name.clone(), idx);
        }
    }
}
