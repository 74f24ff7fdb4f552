//! Converts a parsed GraphQL argument value into `serde_json::Value`,
//! substituting variables along the way. Keeping this conversion at the
//! boundary means [`filterengine`] never has to know about the parser's AST.

use common::{DbError, DbResult};
use graphql_parser::query::Value as GqlValue;
use serde_json::{Map, Value as Json};

pub fn gql_value_to_json(value: &GqlValue<'_, String>, variables: &Map<String, Json>) -> DbResult<Json> {
    match value {
        GqlValue::Variable(name) => variables
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::Invalid(format!("undefined variable '${name}'"))),
        GqlValue::Int(n) => Ok(n
            .as_i64()
            .map(Json::from)
            .unwrap_or(Json::Null)),
        GqlValue::Float(f) => Ok(serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null)),
        GqlValue::String(s) => Ok(Json::String(s.clone())),
        GqlValue::Boolean(b) => Ok(Json::Bool(*b)),
        GqlValue::Null => Ok(Json::Null),
        GqlValue::Enum(e) => Ok(Json::String(e.clone())),
        GqlValue::List(items) => Ok(Json::Array(
            items
                .iter()
                .map(|v| gql_value_to_json(v, variables))
                .collect::<DbResult<Vec<_>>>()?,
        )),
        GqlValue::Object(obj) => {
            let mut map = Map::new();
            for (k, v) in obj {
                map.insert(k.clone(), gql_value_to_json(v, variables)?);
            }
            Ok(Json::Object(map))
        }
    }
}

/// Convert a field's argument list into a JSON object keyed by argument
/// name, resolving any `$variable` references against `variables`.
pub fn arguments_to_json(
    arguments: &[(String, GqlValue<'_, String>)],
    variables: &Map<String, Json>,
) -> DbResult<Map<String, Json>> {
    let mut map = Map::new();
    for (name, value) in arguments {
        map.insert(name.clone(), gql_value_to_json(value, variables)?);
    }
    Ok(map)
}
