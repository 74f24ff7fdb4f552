//! Evaluates Prisma-style `where` trees over records and applies
//! `orderBy`/`skip`/`take`. The resolver hands this crate a decoded JSON
//! value for each argument rather than the raw GraphQL query AST, keeping
//! the filter/sort/paginate semantics independent of the parser crate.


use catalog::TableMeta;
use common::{DbError, DbResult, Record};
use serde_json::{Map, Value as Json};
use std::cmp::Ordering;
use types::{ScalarKind, Value};

/// A parsed `where` predicate tree, ready to evaluate against a [`Record`].
#[derive(Clone, Debug, PartialEq)]
pub enum WhereNode {
    And(Vec<WhereNode>),
    Or(Vec<WhereNode>),
    Not(Box<WhereNode>),
    Field { field: String, op: FieldOp },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StringMode {
    Default,
    Insensitive,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldOp {
    Equals(Value),
    Not(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    Contains(String, StringMode),
    StartsWith(String, StringMode),
    EndsWith(String, StringMode),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderByField {
    pub field: String,
    pub direction: Direction,
}

/// Parse a `where` argument (already decoded to JSON) into a [`WhereNode`],
/// validating every field name and operator against `meta`. An absent or
/// `null` where clause is the identity filter: it matches every record.
pub fn parse_where(meta: &TableMeta, json: &Json) -> DbResult<WhereNode> {
    let obj = match json {
        Json::Object(o) => o,
        Json::Null => return Ok(WhereNode::And(Vec::new())),
        _ => return Err(DbError::Invalid("where clause must be an object".into())),
    };

    let mut children = Vec::new();
    for (key, val) in obj {
        match key.as_str() {
            "AND" => children.push(WhereNode::And(parse_where_list(meta, val)?)),
            "OR" => children.push(WhereNode::Or(parse_where_list(meta, val)?)),
            "NOT" => children.push(WhereNode::Not(Box::new(parse_where(meta, val)?))),
            field => children.push(parse_field_clause(meta, field, val)?),
        }
    }
    Ok(if children.len() == 1 {
        children.into_iter().next().unwrap()
    } else {
        WhereNode::And(children)
    })
}

fn parse_where_list(meta: &TableMeta, json: &Json) -> DbResult<Vec<WhereNode>> {
    match json {
        Json::Array(items) => items.iter().map(|i| parse_where(meta, i)).collect(),
        _ => Err(DbError::Invalid(
            "AND/OR requires an array of where clauses".into(),
        )),
    }
}

fn parse_field_clause(meta: &TableMeta, field: &str, val: &Json) -> DbResult<WhereNode> {
    let column = meta
        .column(field)
        .ok_or_else(|| DbError::Invalid(format!("unknown field '{field}' in where clause")))?;

    match val {
        Json::Object(op_obj) => {
            let ops = parse_field_ops(column.kind, op_obj, field)?;
            if ops.is_empty() {
                return Err(DbError::Invalid(format!(
                    "field '{field}': empty operator object"
                )));
            }
            let nodes: Vec<WhereNode> = ops
                .into_iter()
                .map(|op| WhereNode::Field {
                    field: field.to_string(),
                    op,
                })
                .collect();
            Ok(if nodes.len() == 1 {
                nodes.into_iter().next().unwrap()
            } else {
                WhereNode::And(nodes)
            })
        }
        literal => Ok(WhereNode::Field {
            field: field.to_string(),
            op: FieldOp::Equals(json_to_value(column.kind, literal, field)?),
        }),
    }
}

fn parse_field_ops(kind: ScalarKind, obj: &Map<String, Json>, field: &str) -> DbResult<Vec<FieldOp>> {
    let mode = match obj.get("mode") {
        Some(Json::String(s)) if s == "insensitive" => StringMode::Insensitive,
        Some(Json::String(s)) if s == "default" => StringMode::Default,
        Some(_) => {
            return Err(DbError::Invalid(format!(
                "field '{field}': mode must be 'default' or 'insensitive'"
            )));
        }
        None => StringMode::Default,
    };

    let mut ops = Vec::new();
    for (key, val) in obj {
        let op = match key.as_str() {
            "mode" => continue,
            "equals" => FieldOp::Equals(json_to_value(kind, val, field)?),
            "not" => FieldOp::Not(json_to_value(kind, val, field)?),
            "in" => FieldOp::In(json_array_to_values(kind, val, field)?),
            "notIn" => FieldOp::NotIn(json_array_to_values(kind, val, field)?),
            "lt" => check_ordered(kind, field, FieldOp::Lt(json_to_value(kind, val, field)?))?,
            "lte" => check_ordered(kind, field, FieldOp::Lte(json_to_value(kind, val, field)?))?,
            "gt" => check_ordered(kind, field, FieldOp::Gt(json_to_value(kind, val, field)?))?,
            "gte" => check_ordered(kind, field, FieldOp::Gte(json_to_value(kind, val, field)?))?,
            "contains" => check_string(kind, field, FieldOp::Contains(expect_string(val, field)?, mode))?,
            "startsWith" => {
                check_string(kind, field, FieldOp::StartsWith(expect_string(val, field)?, mode))?
            }
            "endsWith" => {
                check_string(kind, field, FieldOp::EndsWith(expect_string(val, field)?, mode))?
            }
            other => {
                return Err(DbError::Invalid(format!(
                    "field '{field}': unknown operator '{other}'"
                )));
            }
        };
        ops.push(op);
    }
    Ok(ops)
}

fn check_ordered(kind: ScalarKind, field: &str, op: FieldOp) -> DbResult<FieldOp> {
    match kind {
        ScalarKind::Boolean | ScalarKind::Id => Err(DbError::Invalid(format!(
            "field '{field}': ordering operators do not apply to this scalar kind"
        ))),
        _ => Ok(op),
    }
}

fn check_string(kind: ScalarKind, field: &str, op: FieldOp) -> DbResult<FieldOp> {
    if kind != ScalarKind::String {
        return Err(DbError::Invalid(format!(
            "field '{field}': string operators only apply to String fields"
        )));
    }
    Ok(op)
}

fn expect_string(json: &Json, field: &str) -> DbResult<String> {
    match json {
        Json::String(s) => Ok(s.clone()),
        _ => Err(DbError::Invalid(format!(
            "field '{field}': expected a string argument"
        ))),
    }
}

fn json_to_value(kind: ScalarKind, json: &Json, field: &str) -> DbResult<Value> {
    match (kind, json) {
        (_, Json::Null) => Ok(Value::Null),
        (ScalarKind::Id | ScalarKind::String, Json::String(s)) => Ok(Value::String(s.clone())),
        (ScalarKind::Int, Json::Number(n)) => n
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| DbError::Invalid(format!("field '{field}': expected an integer"))),
        (ScalarKind::Float, Json::Number(n)) => n
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| DbError::Invalid(format!("field '{field}': expected a float"))),
        (ScalarKind::Boolean, Json::Bool(b)) => Ok(Value::Bool(*b)),
        _ => Err(DbError::SchemaMismatch(format!(
            "field '{field}': value does not match declared scalar kind"
        ))),
    }
}

fn json_array_to_values(kind: ScalarKind, json: &Json, field: &str) -> DbResult<Vec<Value>> {
    match json {
        Json::Array(items) => items.iter().map(|v| json_to_value(kind, v, field)).collect(),
        _ => Err(DbError::Invalid(format!(
            "field '{field}': expected an array argument"
        ))),
    }
}

/// Parse an `orderBy` argument: either a single `{field: direction}` object
/// or an array of them, evaluated left to right for tie-breaking.
pub fn parse_order_by(meta: &TableMeta, json: &Json) -> DbResult<Vec<OrderByField>> {
    let items: Vec<&Json> = match json {
        Json::Array(arr) => arr.iter().collect(),
        Json::Object(_) => vec![json],
        Json::Null => return Ok(Vec::new()),
        _ => {
            return Err(DbError::Invalid(
                "orderBy must be an object or array of objects".into(),
            ));
        }
    };

    let mut fields = Vec::new();
    for item in items {
        let obj = match item {
            Json::Object(o) => o,
            _ => return Err(DbError::Invalid("orderBy entry must be an object".into())),
        };
        for (field, dir) in obj {
            if !meta.has_column(field) {
                return Err(DbError::Invalid(format!(
                    "unknown field '{field}' in orderBy"
                )));
            }
            let direction = match dir {
                Json::String(s) if s == "asc" => Direction::Asc,
                Json::String(s) if s == "desc" => Direction::Desc,
                _ => {
                    return Err(DbError::Invalid(format!(
                        "orderBy field '{field}': direction must be 'asc' or 'desc'"
                    )));
                }
            };
            fields.push(OrderByField {
                field: field.clone(),
                direction,
            });
        }
    }
    Ok(fields)
}

/// Evaluate `node` against `record`. Absent or `null` fields only satisfy
/// `{not: <non-null>}` or direct equality against `null`; every other
/// operator treats a null field as non-matching.
pub fn evaluate(node: &WhereNode, record: &Record) -> bool {
    match node {
        WhereNode::And(children) => children.iter().all(|c| evaluate(c, record)),
        WhereNode::Or(children) => children.iter().any(|c| evaluate(c, record)),
        WhereNode::Not(child) => !evaluate(child, record),
        WhereNode::Field { field, op } => eval_field_op(record.get(field), op),
    }
}

fn eval_field_op(value: Option<&Value>, op: &FieldOp) -> bool {
    let is_null = matches!(value, None | Some(Value::Null));
    match op {
        FieldOp::Equals(target) => {
            if is_null {
                matches!(target, Value::Null)
            } else {
                value.unwrap().eq_same_type(target) == Some(true)
            }
        }
        FieldOp::Not(target) => {
            if is_null {
                !matches!(target, Value::Null)
            } else {
                value.unwrap().eq_same_type(target) != Some(true)
            }
        }
        FieldOp::In(targets) => {
            !is_null && targets.iter().any(|t| value.unwrap().eq_same_type(t) == Some(true))
        }
        FieldOp::NotIn(targets) => {
            !is_null && !targets.iter().any(|t| value.unwrap().eq_same_type(t) == Some(true))
        }
        FieldOp::Lt(bound) => ordered_cmp(value, bound, is_null) == Some(Ordering::Less),
        FieldOp::Lte(bound) => matches!(
            ordered_cmp(value, bound, is_null),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FieldOp::Gt(bound) => ordered_cmp(value, bound, is_null) == Some(Ordering::Greater),
        FieldOp::Gte(bound) => matches!(
            ordered_cmp(value, bound, is_null),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FieldOp::Contains(needle, mode) => string_match(value, is_null, |h| contains(h, needle, *mode)),
        FieldOp::StartsWith(needle, mode) => {
            string_match(value, is_null, |h| starts_with(h, needle, *mode))
        }
        FieldOp::EndsWith(needle, mode) => string_match(value, is_null, |h| ends_with(h, needle, *mode)),
    }
}

fn ordered_cmp(value: Option<&Value>, bound: &Value, is_null: bool) -> Option<Ordering> {
    if is_null {
        return None;
    }
    value.unwrap().cmp_same_type(bound)
}

fn string_match(value: Option<&Value>, is_null: bool, pred: impl Fn(&str) -> bool) -> bool {
    if is_null {
        return false;
    }
    match value {
        Some(Value::String(s)) => pred(s),
        _ => false,
    }
}

fn contains(haystack: &str, needle: &str, mode: StringMode) -> bool {
    match mode {
        StringMode::Default => haystack.contains(needle),
        StringMode::Insensitive => haystack.to_lowercase().contains(&needle.to_lowercase()),
    }
}

fn starts_with(haystack: &str, needle: &str, mode: StringMode) -> bool {
    match mode {
        StringMode::Default => haystack.starts_with(needle),
        StringMode::Insensitive => haystack.to_lowercase().starts_with(&needle.to_lowercase()),
    }
}

fn ends_with(haystack: &str, needle: &str, mode: StringMode) -> bool {
    match mode {
        StringMode::Default => haystack.ends_with(needle),
        StringMode::Insensitive => haystack.to_lowercase().ends_with(&needle.to_lowercase()),
    }
}

/// Sort `records` in place per `order_by`, left to right for tie-breaking.
/// Nulls sort last in ascending order, first in descending.
pub fn sort_records(records: &mut [(String, Record)], order_by: &[OrderByField]) {
    records.sort_by(|(_, a), (_, b)| compare_records(a, b, order_by));
}

fn compare_records(a: &Record, b: &Record, order_by: &[OrderByField]) -> Ordering {
    for ob in order_by {
        let ord = compare_nullable(a.get(&ob.field), b.get(&ob.field), ob.direction);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_nullable(a: Option<&Value>, b: Option<&Value>, dir: Direction) -> Ordering {
    let a_null = matches!(a, None | Some(Value::Null));
    let b_null = matches!(b, None | Some(Value::Null));
    match (a_null, b_null) {
        (true, true) => Ordering::Equal,
        (true, false) => {
            if dir == Direction::Asc {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, true) => {
            if dir == Direction::Asc {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, false) => {
            let ord = a.unwrap().cmp_same_type(b.unwrap()).unwrap_or(Ordering::Equal);
            if dir == Direction::Asc {
                ord
            } else {
                ord.reverse()
            }
        }
    }
}

/// Apply `skip`/`take` pagination to an already sorted/filtered list.
pub fn paginate(
    records: Vec<(String, Record)>,
    skip: usize,
    take: Option<usize>,
) -> Vec<(String, Record)> {
    let skipped = records.into_iter().skip(skip);
    match take {
        Some(n) => skipped.take(n).collect(),
        None => skipped.collect(),
    }
}
