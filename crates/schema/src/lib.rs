//! Derives table metadata from GraphQL SDL and loads JSON seed data against
//! it. This is the bootstrap path: a host hands this crate schema text once
//! at startup, gets back a set of open [`Table`] handles, and optionally
//! feeds them seed records before serving queries.
//!
//! Every type's fields are classified into one of three shapes:
//! - a scalar (or enum, which is a string on disk) becomes a column;
//! - a reference to another type becomes a foreign-key column on this table,
//!   unless it is the computed reverse side of a one-to-many relationship
//!   the related type already declares a forward pointer for, in which case
//!   it resolves to a lookup with no local column (see [`RelationKind`]).
//!
//! Reopening an existing table only ever widens its column list: a field
//! dropped from newer SDL is never deleted from already-persisted tables
//! (see DESIGN.md for why removal is refused rather than supported).

#[cfg(test)]
mod tests;

use catalog::{Column, RelationDescriptor, RelationKind, TableMeta};
use common::{DbError, DbResult, Record, StoreConfig};
use graphql_parser::schema::{self as gql, Definition, Document, Type, TypeDefinition};
use serde_json::Value as Json;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use table::Table;
use tracing::{info, warn};
use types::{ScalarKind, Value};

/// Root operation type names, excluded from table derivation: a document
/// describing a data model has no business deriving a `Query` table.
const ROOT_OPERATION_TYPES: [&str; 3] = ["Query", "Mutation", "Subscription"];

/// A GraphQL enum declaration, kept distinct from a plain string column so
/// the resolver can publish it for introspection and validate against it.
#[derive(Clone, Debug, PartialEq)]
pub struct EnumDescriptor {
    pub name: String,
    pub values: Vec<String>,
}

/// The result of deriving table metadata from one SDL document.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedSchema {
    pub tables: Vec<TableMeta>,
    pub enums: Vec<EnumDescriptor>,
}

struct RawField {
    name: String,
    type_name: String,
    is_list: bool,
    nullable: bool,
}

struct RawObject {
    name: String,
    fields: Vec<RawField>,
}

/// Unwrap `NonNullType`/`ListType` wrappers down to the named type, tracking
/// whether the field itself is list-shaped and whether it is nullable.
/// Nested item-nullability (e.g. `[Post!]` vs `[Post]`) is not preserved —
/// a column only distinguishes "this field is a list" from "this field is
/// required", not the nullability of individual list items.
fn field_shape(t: &Type<String>) -> (String, bool, bool) {
    match t {
        Type::NonNullType(inner) => {
            let (name, is_list, _) = field_shape(inner);
            (name, is_list, false)
        }
        Type::ListType(inner) => {
            let (name, _, _) = field_shape(inner);
            (name, true, true)
        }
        Type::NamedType(name) => (name.clone(), false, true),
    }
}

fn builtin_scalar_kind(name: &str) -> Option<ScalarKind> {
    match name {
        "ID" => Some(ScalarKind::Id),
        "String" => Some(ScalarKind::String),
        "Int" => Some(ScalarKind::Int),
        "Float" => Some(ScalarKind::Float),
        "Boolean" => Some(ScalarKind::Boolean),
        _ => None,
    }
}

/// Drop a trailing `s` to turn a list field's name into a singular foreign
/// key stem (`authors` -> `author`). Source schemas in this corpus use
/// regular plurals; this is not a general English singularizer.
fn singularize(field: &str) -> &str {
    field.strip_suffix('s').unwrap_or(field)
}

/// Parse SDL text and derive a [`TableMeta`] per declared object type.
/// `input`, `interface`, `union`, and `scalar` blocks are ignored, as are
/// the conventional root operation type names.
pub fn load_schema(sdl: &str) -> DbResult<LoadedSchema> {
    let doc: Document<String> =
        gql::parse_schema(sdl).map_err(|e| DbError::Invalid(format!("invalid SDL: {e}")))?;

    let mut raw_objects = Vec::new();
    let mut enums = Vec::new();
    for def in &doc.definitions {
        let Definition::TypeDefinition(td) = def else {
            continue;
        };
        match td {
            TypeDefinition::Object(obj) if !ROOT_OPERATION_TYPES.contains(&obj.name.as_str()) => {
                let fields = obj
                    .fields
                    .iter()
                    .map(|f| {
                        let (type_name, is_list, nullable) = field_shape(&f.field_type);
                        RawField {
                            name: f.name.clone(),
                            type_name,
                            is_list,
                            nullable,
                        }
                    })
                    .collect();
                raw_objects.push(RawObject {
                    name: obj.name.clone(),
                    fields,
                });
            }
            TypeDefinition::Enum(en) => {
                enums.push(EnumDescriptor {
                    name: en.name.clone(),
                    values: en.values.iter().map(|v| v.name.clone()).collect(),
                });
            }
            _ => {}
        }
    }

    if raw_objects.is_empty() {
        return Err(DbError::Invalid(
            "SDL declares no object types to derive tables from".into(),
        ));
    }

    let enum_names: HashSet<&str> = enums.iter().map(|e| e.name.as_str()).collect();
    let object_names: HashSet<&str> = raw_objects.iter().map(|o| o.name.as_str()).collect();

    // A list-typed relation field is the computed reverse side of a
    // one-to-many when its related type carries a scalar relation field
    // pointing back to the owner: e.g. Author.posts: [Post!]! is reverse
    // when Post.author: Author! exists. Otherwise it is a forward,
    // many-to-many style list of local foreign-key ids.
    let mut reverse_back_ref: HashMap<(String, String), String> = HashMap::new();
    for owner in &raw_objects {
        for field in &owner.fields {
            if !field.is_list || !object_names.contains(field.type_name.as_str()) {
                continue;
            }
            let related = raw_objects.iter().find(|o| o.name == field.type_name).unwrap();
            if let Some(back_field) = related
                .fields
                .iter()
                .find(|rf| !rf.is_list && rf.type_name == owner.name)
            {
                reverse_back_ref.insert(
                    (owner.name.clone(), field.name.clone()),
                    back_field.name.clone(),
                );
            }
        }
    }

    let mut tables = Vec::with_capacity(raw_objects.len());
    for obj in &raw_objects {
        let mut columns = Vec::new();
        let mut relations = Vec::new();
        let mut has_id = false;

        for field in &obj.fields {
            if let Some(kind) = builtin_scalar_kind(&field.type_name) {
                if field.name == "id" {
                    has_id = true;
                }
                columns.push(Column {
                    name: field.name.clone(),
                    kind,
                    nullable: field.nullable,
                    is_list: field.is_list,
                    enum_name: None,
                });
            } else if enum_names.contains(field.type_name.as_str()) {
                columns.push(Column {
                    name: field.name.clone(),
                    kind: ScalarKind::String,
                    nullable: field.nullable,
                    is_list: field.is_list,
                    enum_name: Some(field.type_name.clone()),
                });
            } else if object_names.contains(field.type_name.as_str()) {
                if let Some(back_field) =
                    reverse_back_ref.get(&(obj.name.clone(), field.name.clone()))
                {
                    relations.push(RelationDescriptor {
                        field: field.name.clone(),
                        kind: RelationKind::HasMany,
                        related_table: field.type_name.clone(),
                        foreign_key_field: format!("{back_field}Id"),
                    });
                } else {
                    let fk_name = if field.is_list {
                        format!("{}Ids", singularize(&field.name))
                    } else {
                        format!("{}Id", field.name)
                    };
                    columns.push(Column {
                        name: fk_name.clone(),
                        kind: ScalarKind::Id,
                        nullable: field.nullable,
                        is_list: field.is_list,
                        enum_name: None,
                    });
                    relations.push(RelationDescriptor {
                        field: field.name.clone(),
                        kind: RelationKind::BelongsTo,
                        related_table: field.type_name.clone(),
                        foreign_key_field: fk_name,
                    });
                }
            } else {
                return Err(DbError::SchemaMismatch(format!(
                    "field '{}' on type '{}' has unknown type '{}'",
                    field.name, obj.name, field.type_name
                )));
            }
        }

        if !has_id {
            columns.insert(0, Column::scalar("id", ScalarKind::Id, false));
        }

        let meta = TableMeta::try_new(obj.name.clone(), columns, "id")?.with_relations(relations);
        tables.push(meta);
    }

    Ok(LoadedSchema { tables, enums })
}

/// Create or open a [`Table`] per derived entry in `loaded`, widening an
/// already-open table's schema to the latest derivation rather than
/// replacing it.
pub fn open_tables(
    dir: &Path,
    config: &StoreConfig,
    loaded: &LoadedSchema,
) -> DbResult<HashMap<String, Table>> {
    let mut tables = HashMap::with_capacity(loaded.tables.len());
    for meta in &loaded.tables {
        let path = dir.join(format!("{}.tbl", meta.name));
        let table = if path.exists() {
            let mut table = Table::open(&meta.name, dir, config)?;
            table.widen_schema(&meta.columns, &meta.relations)?;
            table
        } else {
            Table::create(&meta.name, dir, meta.clone(), config)?
        };
        tables.insert(meta.name.clone(), table);
    }
    Ok(tables)
}

/// Insert seed data shaped `{<TypeName>: [record, ...], ...}` into the
/// matching open tables, trusting the provided `id` and foreign-key fields.
/// A type name absent from `tables` is skipped with a structured warning
/// rather than failing the whole load.
pub fn load_data(tables: &mut HashMap<String, Table>, json: &Json) -> DbResult<()> {
    let obj = match json {
        Json::Object(o) => o,
        _ => {
            return Err(DbError::Invalid(
                "seed data must be a JSON object keyed by type name".into(),
            ));
        }
    };

    for (type_name, records_json) in obj {
        let Some(table) = tables.get_mut(type_name) else {
            warn!(table = %type_name, "seed data names unknown table; skipped");
            continue;
        };
        let records = match records_json {
            Json::Array(items) => items,
            _ => {
                return Err(DbError::Invalid(format!(
                    "seed data for '{type_name}' must be an array"
                )));
            }
        };
        for record_json in records {
            let record = record_from_json(table.metadata(), record_json)?;
            table.insert(record, false)?;
        }
        info!(table = %type_name, count = records.len(), "loaded seed records");
    }
    Ok(())
}

/// Convert a JSON object into a [`Record`] validated against `meta`'s
/// columns, coercing each field's JSON value to the column's declared
/// scalar kind. Shared by seed-data loading and the resolver's mutation
/// input handling.
pub fn record_from_json(meta: &TableMeta, json: &Json) -> DbResult<Record> {
    let obj = match json {
        Json::Object(o) => o,
        _ => return Err(DbError::Invalid("seed record must be a JSON object".into())),
    };
    let mut record = Record::new();
    for (field, value) in obj {
        let column = meta.column(field).ok_or_else(|| {
            DbError::SchemaMismatch(format!(
                "seed data references unknown field '{field}' on table '{}'",
                meta.name
            ))
        })?;
        record.set(field.clone(), json_to_value(column, value, field)?);
    }
    Ok(record)
}

fn json_to_value(column: &Column, json: &Json, field: &str) -> DbResult<Value> {
    if column.is_list {
        let Json::Array(items) = json else {
            return Err(DbError::Invalid(format!("field '{field}' expects a list")));
        };
        let values = items
            .iter()
            .map(|item| scalar_json_to_value(column.kind, item, field))
            .collect::<DbResult<Vec<_>>>()?;
        return Ok(Value::List(values));
    }
    scalar_json_to_value(column.kind, json, field)
}

fn scalar_json_to_value(kind: ScalarKind, json: &Json, field: &str) -> DbResult<Value> {
    match (kind, json) {
        (_, Json::Null) => Ok(Value::Null),
        (ScalarKind::Id | ScalarKind::String, Json::String(s)) => Ok(Value::String(s.clone())),
        (ScalarKind::Int, Json::Number(n)) => n
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| DbError::Invalid(format!("field '{field}' expects an integer"))),
        (ScalarKind::Float, Json::Number(n)) => n
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| DbError::Invalid(format!("field '{field}' expects a float"))),
        (ScalarKind::Boolean, Json::Bool(b)) => Ok(Value::Bool(*b)),
        _ => Err(DbError::SchemaMismatch(format!(
            "field '{field}' value does not match declared scalar kind"
        ))),
    }
}
