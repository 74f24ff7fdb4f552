//! Turns a record set plus a GraphQL selection set into JSON, resolving any
//! relationship field it encounters along the way.
//!
//! Every relationship resolution gathers the full parent batch's keys
//! before issuing a single lookup, so nesting a relation inside a
//! connection's `items` never turns into one lookup per parent.

use crate::Resolver;
use catalog::{RelationDescriptor, RelationKind, TableMeta};
use common::{DbError, DbResult, Record};
use graphql_parser::query::{Field, Selection, SelectionSet};
use serde_json::{Map, Value as Json};
use std::collections::{HashMap, HashSet};
use types::{RefValue, Value};

impl Resolver {
    pub(crate) fn project_records(
        &mut self,
        type_name: &str,
        records: Vec<(String, Record)>,
        selection_set: &SelectionSet<'_, String>,
        variables: &Map<String, Json>,
    ) -> DbResult<Vec<Json>> {
        let meta = self
            .tables
            .get(type_name)
            .ok_or_else(|| DbError::NotFound(type_name.to_string()))?
            .metadata()
            .clone();

        let mut objects: Vec<Map<String, Json>> = records.iter().map(|_| Map::new()).collect();

        for selection in &selection_set.items {
            let Selection::Field(field) = selection else {
                return Err(DbError::Invalid("fragments are not supported".into()));
            };
            let out_key = field.alias.clone().unwrap_or_else(|| field.name.clone());

            if field.name == "__typename" {
                for obj in &mut objects {
                    obj.insert(out_key.clone(), Json::String(type_name.to_string()));
                }
                continue;
            }

            if let Some(relation) = meta.relation(&field.name).cloned() {
                self.resolve_relation(&relation, &meta, &records, &mut objects, &out_key, field, variables)?;
                continue;
            }

            if !meta.has_column(&field.name) {
                return Err(DbError::Invalid(format!(
                    "unknown field '{}' on type '{type_name}'",
                    field.name
                )));
            }
            for (obj, (_, record)) in objects.iter_mut().zip(records.iter()) {
                let value = record.get(&field.name).map(value_to_json).unwrap_or(Json::Null);
                obj.insert(out_key.clone(), value);
            }
        }

        Ok(objects.into_iter().map(Json::Object).collect())
    }

    fn resolve_relation(
        &mut self,
        relation: &RelationDescriptor,
        meta: &TableMeta,
        records: &[(String, Record)],
        objects: &mut [Map<String, Json>],
        out_key: &str,
        field: &Field<'_, String>,
        variables: &Map<String, Json>,
    ) -> DbResult<()> {
        match relation.kind {
            RelationKind::HasMany => self.resolve_has_many(relation, records, objects, out_key, field, variables),
            RelationKind::BelongsTo => {
                let fk_is_list = meta
                    .column(&relation.foreign_key_field)
                    .map(|c| c.is_list)
                    .unwrap_or(false);
                if fk_is_list {
                    self.resolve_belongs_to_many(relation, records, objects, out_key, field, variables)
                } else {
                    self.resolve_belongs_to_one(relation, records, objects, out_key, field, variables)
                }
            }
        }
    }

    /// Scalar `BelongsTo`: one related record per parent, looked up directly
    /// by primary key. No batching helps here — a primary-key lookup is
    /// already O(1) per parent.
    fn resolve_belongs_to_one(
        &mut self,
        relation: &RelationDescriptor,
        records: &[(String, Record)],
        objects: &mut [Map<String, Json>],
        out_key: &str,
        field: &Field<'_, String>,
        variables: &Map<String, Json>,
    ) -> DbResult<()> {
        let related_name = relation.related_table.clone();
        for (obj, (_, record)) in objects.iter_mut().zip(records.iter()) {
            let Some(fk) = record.get(&relation.foreign_key_field).and_then(Value::as_str) else {
                obj.insert(out_key.to_string(), Json::Null);
                continue;
            };
            let fk = fk.to_string();
            let related = {
                let table = self
                    .tables
                    .get_mut(&related_name)
                    .ok_or_else(|| DbError::NotFound(related_name.clone()))?;
                table.find(&fk)?
            };
            let value = match related {
                None => Json::Null,
                Some(r) => self
                    .project_records(&related_name, vec![(fk.clone(), r)], &field.selection_set, variables)?
                    .into_iter()
                    .next()
                    .unwrap(),
            };
            obj.insert(out_key.to_string(), value);
        }
        Ok(())
    }

    /// List `BelongsTo` (a many-to-many-style list of local foreign-key
    /// ids): one `find_in` over the union of every parent's id list, then
    /// each parent reassembles its own ordered slice from the shared batch.
    fn resolve_belongs_to_many(
        &mut self,
        relation: &RelationDescriptor,
        records: &[(String, Record)],
        objects: &mut [Map<String, Json>],
        out_key: &str,
        field: &Field<'_, String>,
        variables: &Map<String, Json>,
    ) -> DbResult<()> {
        let related_name = relation.related_table.clone();
        let mut all_ids: HashSet<String> = HashSet::new();
        for (_, record) in records {
            if let Some(Value::List(items)) = record.get(&relation.foreign_key_field) {
                all_ids.extend(items.iter().filter_map(|v| v.as_str().map(String::from)));
            }
        }
        let id_values: Vec<Value> = all_ids.into_iter().map(Value::String).collect();

        let related_records = {
            let table = self
                .tables
                .get_mut(&related_name)
                .ok_or_else(|| DbError::NotFound(related_name.clone()))?;
            table.find_in("id", &id_values)?
        };
        let projected = self.project_records(&related_name, related_records.clone(), &field.selection_set, variables)?;
        let projected_by_id: HashMap<&str, Json> = related_records
            .iter()
            .map(|(id, _)| id.as_str())
            .zip(projected)
            .collect();

        for (obj, (_, record)) in objects.iter_mut().zip(records.iter()) {
            let ids: Vec<&str> = match record.get(&relation.foreign_key_field) {
                Some(Value::List(items)) => items.iter().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            };
            let arr: Vec<Json> = ids.iter().filter_map(|id| projected_by_id.get(id).cloned()).collect();
            obj.insert(out_key.to_string(), Json::Array(arr));
        }
        Ok(())
    }

    /// Reverse `HasMany`: one `find_in` over the related table's foreign-key
    /// column against every parent id, then children are grouped back onto
    /// their parent by that same foreign key.
    fn resolve_has_many(
        &mut self,
        relation: &RelationDescriptor,
        records: &[(String, Record)],
        objects: &mut [Map<String, Json>],
        out_key: &str,
        field: &Field<'_, String>,
        variables: &Map<String, Json>,
    ) -> DbResult<()> {
        let related_name = relation.related_table.clone();
        let fk_field = relation.foreign_key_field.clone();
        let parent_ids: Vec<Value> = records.iter().map(|(id, _)| Value::String(id.clone())).collect();

        let child_records = {
            let table = self
                .tables
                .get_mut(&related_name)
                .ok_or_else(|| DbError::NotFound(related_name.clone()))?;
            table.find_in(&fk_field, &parent_ids)?
        };

        let projected = self.project_records(&related_name, child_records.clone(), &field.selection_set, variables)?;
        let projected_by_id: HashMap<&str, Json> = child_records
            .iter()
            .map(|(id, _)| id.as_str())
            .zip(projected)
            .collect();

        let mut grouped: HashMap<&str, Vec<&str>> = HashMap::new();
        for (child_id, child_record) in &child_records {
            if let Some(parent_id) = child_record.get(&fk_field).and_then(Value::as_str) {
                grouped.entry(parent_id).or_default().push(child_id.as_str());
            }
        }

        for (obj, (parent_id, _)) in objects.iter_mut().zip(records.iter()) {
            let arr: Vec<Json> = grouped
                .get(parent_id.as_str())
                .into_iter()
                .flatten()
                .filter_map(|child_id| projected_by_id.get(child_id).cloned())
                .collect();
            obj.insert(out_key.to_string(), Json::Array(arr));
        }
        Ok(())
    }
}

pub(crate) fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::String(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Ref(RefValue::Id(id)) => Json::String(id.clone()),
        Value::Ref(RefValue::Ids(ids)) => Json::Array(ids.iter().cloned().map(Json::String).collect()),
    }
}
