//! Executes a parsed GraphQL document against a set of open tables.
//!
//! A [`Resolver`] owns every table for one schema derivation plus the
//! dynamic index advisor, and derives its own query/mutation field naming
//! from the entity names in that derivation (`Post` -> query fields
//! `post(id)`/`posts`, mutation fields `createPost`/`updatePost`/
//! `deletePost`). Each root selection field is resolved independently: an
//! error on one field never aborts its siblings, matching the per-field
//! error isolation the resolver owes mutations, applied uniformly to
//! queries as well.
//!
//! Relationship resolution always gathers keys across a whole selection
//! set before issuing a lookup, so a parent list with hundreds of entries
//! costs one bulk fetch per relationship field, never one per parent.

mod introspect;
mod mutations;
mod projection;
mod query_value;
#[cfg(test)]
mod tests;

use common::{DbError, DbResult, Record};
use filterengine::{FieldOp, WhereNode};
use graphql_parser::query::{self as gql, Definition, Field, OperationDefinition, Selection, SelectionSet};
use optimizer::IndexAdvisor;
use schema::LoadedSchema;
use serde_json::{json, Map, Value as Json};
use std::collections::HashMap;
use table::Table;

/// Maps a derived schema's query/mutation field names back to entity names.
pub(crate) struct FieldNames {
    pub(crate) singular: HashMap<String, String>,
    pub(crate) plural: HashMap<String, String>,
    pub(crate) create: HashMap<String, String>,
    pub(crate) update: HashMap<String, String>,
    pub(crate) delete: HashMap<String, String>,
}

/// Owns every open table for one schema derivation and answers parsed
/// GraphQL documents against them.
pub struct Resolver {
    pub(crate) tables: HashMap<String, Table>,
    pub(crate) schema: LoadedSchema,
    pub(crate) advisor: IndexAdvisor,
    pub(crate) field_names: FieldNames,
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn pluralize(singular: &str) -> String {
    format!("{singular}s")
}

impl Resolver {
    pub fn new(tables: HashMap<String, Table>, schema: LoadedSchema, advisor: IndexAdvisor) -> Self {
        let mut singular = HashMap::new();
        let mut plural = HashMap::new();
        let mut create = HashMap::new();
        let mut update = HashMap::new();
        let mut delete = HashMap::new();

        for meta in &schema.tables {
            let field = lower_first(&meta.name);
            singular.insert(field.clone(), meta.name.clone());
            plural.insert(pluralize(&field), meta.name.clone());
            create.insert(format!("create{}", meta.name), meta.name.clone());
            update.insert(format!("update{}", meta.name), meta.name.clone());
            delete.insert(format!("delete{}", meta.name), meta.name.clone());
        }

        Self {
            tables,
            schema,
            advisor,
            field_names: FieldNames {
                singular,
                plural,
                create,
                update,
                delete,
            },
        }
    }

    pub fn schema(&self) -> &LoadedSchema {
        &self.schema
    }

    pub fn table(&mut self, type_name: &str) -> Option<&mut Table> {
        self.tables.get_mut(type_name)
    }

    /// Flush and close every table opened under this schema derivation.
    /// Each table also flushes on drop, but a host shutting down an entire
    /// derivation gets one explicit call and one aggregate error instead of
    /// relying on drop order across a whole `HashMap`.
    pub fn close_all(&mut self) -> DbResult<()> {
        for table in self.tables.values_mut() {
            table.close()?;
        }
        Ok(())
    }

    /// Parse and run one GraphQL document, returning a GraphQL response
    /// envelope: `{"data": ..., "errors": [...]}`. A document-level failure
    /// (parse error, unknown/ambiguous operation) reports `data: null`
    /// rather than a partial object.
    pub fn execute(
        &mut self,
        document_text: &str,
        operation_name: Option<&str>,
        variables: &Map<String, Json>,
    ) -> Json {
        match self.execute_inner(document_text, operation_name, variables) {
            Ok(response) => response,
            Err(e) => json!({ "data": Json::Null, "errors": [{ "message": e.to_string() }] }),
        }
    }

    fn execute_inner(
        &mut self,
        document_text: &str,
        operation_name: Option<&str>,
        variables: &Map<String, Json>,
    ) -> DbResult<Json> {
        let document = gql::parse_query::<String>(document_text)
            .map_err(|e| DbError::Invalid(format!("invalid GraphQL document: {e}")))?;

        let operation = select_operation(&document, operation_name)?;
        if matches!(operation, OperationDefinition::Subscription(_)) {
            return Err(DbError::Invalid("subscriptions are not supported".into()));
        }
        let is_mutation = matches!(operation, OperationDefinition::Mutation(_));
        let selection_set = operation_selection_set(operation);

        let mut data = Map::new();
        let mut errors = Vec::new();
        for selection in &selection_set.items {
            let Selection::Field(field) = selection else {
                return Err(DbError::Invalid("fragments are not supported".into()));
            };
            let out_key = field.alias.clone().unwrap_or_else(|| field.name.clone());
            match self.resolve_root_field(field, variables, is_mutation) {
                Ok(value) => {
                    data.insert(out_key, value);
                }
                Err(e) => {
                    data.insert(out_key.clone(), Json::Null);
                    errors.push(json!({ "message": e.to_string(), "path": [out_key] }));
                }
            }
        }

        let mut response = Map::new();
        response.insert("data".to_string(), Json::Object(data));
        if !errors.is_empty() {
            response.insert("errors".to_string(), Json::Array(errors));
        }
        Ok(Json::Object(response))
    }

    fn resolve_root_field(
        &mut self,
        field: &Field<'_, String>,
        variables: &Map<String, Json>,
        is_mutation: bool,
    ) -> DbResult<Json> {
        let args = query_value::arguments_to_json(&field.arguments, variables)?;
        if is_mutation {
            return self.resolve_mutation(field, &args, variables);
        }
        if let Some(type_name) = self.field_names.singular.get(&field.name).cloned() {
            return self.resolve_single(&type_name, &args, &field.selection_set, variables);
        }
        if let Some(type_name) = self.field_names.plural.get(&field.name).cloned() {
            return self.resolve_connection(&type_name, &field.selection_set, variables);
        }
        Err(DbError::Invalid(format!("unknown query field '{}'", field.name)))
    }

    fn resolve_single(
        &mut self,
        type_name: &str,
        args: &Map<String, Json>,
        selection_set: &SelectionSet<'_, String>,
        variables: &Map<String, Json>,
    ) -> DbResult<Json> {
        let id = args
            .get("id")
            .and_then(Json::as_str)
            .ok_or_else(|| DbError::Invalid("this field requires an 'id' argument".into()))?
            .to_string();

        let record = {
            let table = self
                .tables
                .get_mut(type_name)
                .ok_or_else(|| DbError::NotFound(type_name.to_string()))?;
            table.find(&id)?
        };

        match record {
            None => Ok(Json::Null),
            Some(record) => {
                let projected = self.project_records(type_name, vec![(id, record)], selection_set, variables)?;
                Ok(projected.into_iter().next().unwrap())
            }
        }
    }

    fn resolve_connection(
        &mut self,
        type_name: &str,
        selection_set: &SelectionSet<'_, String>,
        variables: &Map<String, Json>,
    ) -> DbResult<Json> {
        let items_field = selection_set
            .items
            .iter()
            .find_map(|s| match s {
                Selection::Field(f) if f.name == "items" => Some(f),
                _ => None,
            })
            .ok_or_else(|| DbError::Invalid("a connection selection must include 'items'".into()))?;

        let args = query_value::arguments_to_json(&items_field.arguments, variables)?;
        let meta = self
            .tables
            .get(type_name)
            .ok_or_else(|| DbError::NotFound(type_name.to_string()))?
            .metadata()
            .clone();

        let where_node = filterengine::parse_where(&meta, args.get("where").unwrap_or(&Json::Null))?;
        let order_by = filterengine::parse_order_by(&meta, args.get("orderBy").unwrap_or(&Json::Null))?;
        let skip = args.get("skip").and_then(Json::as_u64).unwrap_or(0) as usize;
        let take = args.get("take").and_then(Json::as_u64).map(|n| n as usize);

        let Resolver { tables, advisor, .. } = self;
        let table = tables.get_mut(type_name).expect("checked above");
        advisor.observe(type_name, table, &where_node)?;

        let mut records = fetch_candidates(table, &where_node)?;
        records.retain(|(_, r)| filterengine::evaluate(&where_node, r));
        filterengine::sort_records(&mut records, &order_by);
        let total_count = records.len();
        let page = filterengine::paginate(records, skip, take);

        let projected = self.project_records(type_name, page, &items_field.selection_set, variables)?;
        Ok(json!({ "items": projected, "totalCount": total_count }))
    }
}

/// Resolve a connection's candidate set via a B-tree fast path when the
/// filtered field is a single, already-indexed predicate; otherwise a full
/// scan, matching the fallback the filter engine's callers all share.
fn fetch_candidates(table: &mut Table, node: &WhereNode) -> DbResult<Vec<(String, Record)>> {
    if let WhereNode::Field { field, op } = node
        && table.metadata().has_index(field)
    {
        return match op {
            FieldOp::Equals(v) => table.find_equals(field, v),
            FieldOp::In(values) => table.find_in(field, values),
            FieldOp::Gt(v) => table.find_gt(field, v),
            FieldOp::Gte(v) => table.find_gte(field, v),
            FieldOp::Lt(v) => table.find_lt(field, v),
            FieldOp::Lte(v) => table.find_lte(field, v),
            _ => table.select_all(),
        };
    }
    table.select_all()
}

fn select_operation<'a>(
    document: &'a gql::Document<'a, String>,
    operation_name: Option<&str>,
) -> DbResult<&'a OperationDefinition<'a, String>> {
    let operations: Vec<&OperationDefinition<'a, String>> = document
        .definitions
        .iter()
        .filter_map(|d| match d {
            Definition::Operation(op) => Some(op),
            Definition::Fragment(_) => None,
        })
        .collect();

    if operations.is_empty() {
        return Err(DbError::Invalid("document has no operations".into()));
    }

    if let Some(name) = operation_name {
        operations
            .into_iter()
            .find(|op| operation_name_of(op).as_deref() == Some(name))
            .ok_or_else(|| DbError::Invalid(format!("no operation named '{name}'")))
    } else if operations.len() == 1 {
        Ok(operations[0])
    } else {
        Err(DbError::Invalid(
            "document has multiple operations; an operation name is required".into(),
        ))
    }
}

fn operation_name_of(op: &OperationDefinition<'_, String>) -> Option<String> {
    match op {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(q) => q.name.clone(),
        OperationDefinition::Mutation(m) => m.name.clone(),
        OperationDefinition::Subscription(s) => s.name.clone(),
    }
}

fn operation_selection_set<'a>(op: &'a OperationDefinition<'a, String>) -> &'a SelectionSet<'a, String> {
    match op {
        OperationDefinition::SelectionSet(s) => s,
        OperationDefinition::Query(q) => &q.selection_set,
        OperationDefinition::Mutation(m) => &m.selection_set,
        OperationDefinition::Subscription(s) => &s.selection_set,
    }
}
