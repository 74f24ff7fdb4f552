//! Publishes the shape of a derived schema as plain JSON: every entity's
//! fields, its `<T>Connection`/`<T>WhereInput`/`<T>OrderBy` companions, and
//! every declared enum.
//!
//! `graphql-parser` is a document parser, not a type-system library — it has
//! no machinery for a `__schema`/`__type` meta-field protocol, so this is a
//! queryable Rust API standing in for that protocol rather than a GraphQL
//! wire-level implementation of it.

use crate::Resolver;
use catalog::RelationKind;
use serde_json::{json, Value as Json};
use std::collections::BTreeSet;
use types::ScalarKind;

fn scalar_kind_name(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Id => "ID",
        ScalarKind::String => "String",
        ScalarKind::Int => "Int",
        ScalarKind::Float => "Float",
        ScalarKind::Boolean => "Boolean",
    }
}

impl Resolver {
    /// Describe every entity type derived from the loaded schema, plus its
    /// generated companions and every declared enum.
    pub fn introspect(&self) -> Json {
        let types: Vec<Json> = self.schema.tables.iter().map(describe_type).collect();
        let enums: Vec<Json> = self
            .schema
            .enums
            .iter()
            .map(|e| json!({ "name": e.name, "values": e.values }))
            .collect();

        json!({
            "types": types,
            "enums": enums,
            "sortOrder": ["asc", "desc"],
            "stringFilterModes": ["default", "insensitive"],
        })
    }
}

fn describe_type(meta: &catalog::TableMeta) -> Json {
    let mut fields: Vec<Json> = meta
        .columns
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "type": c.enum_name.clone().unwrap_or_else(|| scalar_kind_name(c.kind).to_string()),
                "nullable": c.nullable,
                "isList": c.is_list,
            })
        })
        .collect();

    for relation in &meta.relations {
        let is_list = matches!(relation.kind, RelationKind::HasMany)
            || meta
                .column(&relation.foreign_key_field)
                .map(|c| c.is_list)
                .unwrap_or(false);
        fields.push(json!({
            "name": relation.field,
            "type": relation.related_table,
            "nullable": true,
            "isList": is_list,
        }));
    }

    let scalar_filters: BTreeSet<&str> = meta.columns.iter().map(|c| scalar_kind_name(c.kind)).collect();

    json!({
        "name": meta.name,
        "fields": fields,
        "connectionType": format!("{}Connection", meta.name),
        "connectionFields": [
            { "name": "items", "type": meta.name, "nullable": false, "isList": true },
            { "name": "totalCount", "type": "Int", "nullable": false, "isList": false },
        ],
        "whereInputType": format!("{}WhereInput", meta.name),
        "orderByType": format!("{}OrderBy", meta.name),
        "scalarFilterInputs": scalar_filters.iter().map(|s| format!("{s}Filter")).collect::<Vec<_>>(),
    })
}
