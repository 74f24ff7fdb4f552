//! `create<T>`/`update<T>`/`delete<T>` mutation fields. Each returns the
//! mutated record projected through the mutation field's own selection set,
//! same as a query root field.

use crate::Resolver;
use common::{DbError, DbResult};
use graphql_parser::query::{Field, SelectionSet};
use serde_json::{Map, Value as Json};
use types::Value;
use uuid::Uuid;

impl Resolver {
    pub(crate) fn resolve_mutation(
        &mut self,
        field: &Field<'_, String>,
        args: &Map<String, Json>,
        variables: &Map<String, Json>,
    ) -> DbResult<Json> {
        if let Some(type_name) = self.field_names.create.get(&field.name).cloned() {
            return self.mutate_create(&type_name, args, &field.selection_set, variables);
        }
        if let Some(type_name) = self.field_names.update.get(&field.name).cloned() {
            return self.mutate_update(&type_name, args, &field.selection_set, variables);
        }
        if let Some(type_name) = self.field_names.delete.get(&field.name).cloned() {
            return self.mutate_delete(&type_name, args, &field.selection_set, variables);
        }
        Err(DbError::Invalid(format!("unknown mutation field '{}'", field.name)))
    }

    fn mutate_create(
        &mut self,
        type_name: &str,
        args: &Map<String, Json>,
        selection_set: &SelectionSet<'_, String>,
        variables: &Map<String, Json>,
    ) -> DbResult<Json> {
        let input = args
            .get("input")
            .ok_or_else(|| DbError::Invalid("this mutation requires an 'input' argument".into()))?;
        let meta = self
            .tables
            .get(type_name)
            .ok_or_else(|| DbError::NotFound(type_name.to_string()))?
            .metadata()
            .clone();

        let mut record = schema::record_from_json(&meta, input)?;
        if record.id().is_none() {
            record.set("id", Value::String(Uuid::new_v4().to_string()));
        }
        let id = record.id().expect("just set above").to_string();

        let table = self.tables.get_mut(type_name).expect("checked above");
        table.insert(record.clone(), false)?;

        let projected = self.project_records(type_name, vec![(id, record)], selection_set, variables)?;
        Ok(projected.into_iter().next().unwrap())
    }

    fn mutate_update(
        &mut self,
        type_name: &str,
        args: &Map<String, Json>,
        selection_set: &SelectionSet<'_, String>,
        variables: &Map<String, Json>,
    ) -> DbResult<Json> {
        let id = args
            .get("id")
            .and_then(Json::as_str)
            .ok_or_else(|| DbError::Invalid("this mutation requires an 'id' argument".into()))?
            .to_string();
        let input = args
            .get("input")
            .ok_or_else(|| DbError::Invalid("this mutation requires an 'input' argument".into()))?;
        let meta = self
            .tables
            .get(type_name)
            .ok_or_else(|| DbError::NotFound(type_name.to_string()))?
            .metadata()
            .clone();

        let partial = schema::record_from_json(&meta, input)?;
        let table = self
            .tables
            .get_mut(type_name)
            .ok_or_else(|| DbError::NotFound(type_name.to_string()))?;
        let merged = table.update(&id, partial)?;

        let projected = self.project_records(type_name, vec![(id, merged)], selection_set, variables)?;
        Ok(projected.into_iter().next().unwrap())
    }

    fn mutate_delete(
        &mut self,
        type_name: &str,
        args: &Map<String, Json>,
        selection_set: &SelectionSet<'_, String>,
        variables: &Map<String, Json>,
    ) -> DbResult<Json> {
        let id = args
            .get("id")
            .and_then(Json::as_str)
            .ok_or_else(|| DbError::Invalid("this mutation requires an 'id' argument".into()))?
            .to_string();
        let table = self
            .tables
            .get_mut(type_name)
            .ok_or_else(|| DbError::NotFound(type_name.to_string()))?;
        let record = table.delete(&id)?;

        let projected = self.project_records(type_name, vec![(id, record)], selection_set, variables)?;
        Ok(projected.into_iter().next().unwrap())
    }
}
