//! SQL construction for the `SQLite` store.
//!
//! Condition trees compile to a `WHERE` fragment over the `items` table with
//! anonymous `?` parameters. Relation quantifiers become correlated
//! `EXISTS` subqueries; filter relations only see verdicts whose fingerprint
//! matches the current `filters` row.
//!
//! Comparisons against `NULL` columns are never true in SQL, which matches
//! the in-memory rule that absent values fail every comparison.
//!
//! `IN` and `NOT IN` lists bind as a single JSON array expanded with
//! `json_each`, so the number of SQL variables stays constant however long
//! the list grows (an iterator's processed ids, for instance).

use crate::Result;
use crate::models::{
    Condition, FieldCondition, FieldOp, ItemField, Operands, OrderBy, RelationMatch, Scalar,
    SortDirection,
};
use rusqlite::types::Value;

/// A compiled `WHERE` fragment and its parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    /// SQL text.
    pub sql: String,
    /// Parameter values.
    pub params: Vec<Value>,
}

/// Compiles a condition into a `WHERE` fragment.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidInput`] for field comparisons with invalid
/// operands.
pub fn compile_condition(condition: &Condition) -> Result<WhereClause> {
    let mut params = Vec::new();
    let sql = compile(condition, &mut params)?;
    Ok(WhereClause { sql, params })
}

fn compile(condition: &Condition, params: &mut Vec<Value>) -> Result<String> {
    match condition {
        Condition::All(children) => join(children, " AND ", "1", params),
        Condition::Any(children) => join(children, " OR ", "0", params),
        Condition::Field(field) => compile_field(field, params),
        Condition::Authors(relation) => Ok(compile_relation(
            relation,
            "SELECT 1 FROM item_authors a WHERE a.item_id = items.id",
            "a.name",
            params,
        )),
        Condition::FiltersChecked(relation) => Ok(compile_relation(
            relation,
            FILTER_VERDICTS,
            "v.filter_title",
            params,
        )),
        Condition::FiltersPassed(relation) => Ok(compile_relation(
            relation,
            &format!("{FILTER_VERDICTS} AND v.passed = 1"),
            "v.filter_title",
            params,
        )),
    }
}

/// Current verdicts of the outer item.
const FILTER_VERDICTS: &str = "SELECT 1 FROM item_filters v \
     JOIN filters f ON f.title = v.filter_title AND f.fingerprint = v.fingerprint \
     WHERE v.item_id = items.id";

fn join(
    children: &[Condition],
    separator: &str,
    empty: &str,
    params: &mut Vec<Value>,
) -> Result<String> {
    if children.is_empty() {
        return Ok(empty.to_string());
    }
    let parts = children
        .iter()
        .map(|child| compile(child, params))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("({})", parts.join(separator)))
}

fn compile_field(field: &FieldCondition, params: &mut Vec<Value>) -> Result<String> {
    let column = column(field.field);
    let sql = match (field.op, field.operands()?) {
        (FieldOp::In, Operands::Many(values)) if values.is_empty() => "0".to_string(),
        (FieldOp::NotIn, Operands::Many(values)) if values.is_empty() => {
            format!("{column} IS NOT NULL")
        },
        (op @ (FieldOp::In | FieldOp::NotIn), Operands::Many(values)) => {
            params.push(json_list(values));
            let keyword = if op == FieldOp::In { "IN" } else { "NOT IN" };
            format!("{column} {keyword} {JSON_LIST}")
        },
        (FieldOp::Contains, Operands::One(value)) => {
            params.push(to_value(value));
            format!("instr({column}, ?) > 0")
        },
        (op, Operands::One(value)) => {
            params.push(to_value(value));
            format!("{column} {} ?", comparison(op))
        },
        // operands() already pairs list operators with lists
        (_, Operands::Many(_)) => "0".to_string(),
    };
    Ok(sql)
}

const fn comparison(op: FieldOp) -> &'static str {
    match op {
        FieldOp::Ne => "<>",
        FieldOp::Gt => ">",
        FieldOp::Gte => ">=",
        FieldOp::Lt => "<",
        FieldOp::Lte => "<=",
        FieldOp::Eq | FieldOp::In | FieldOp::NotIn | FieldOp::Contains => "=",
    }
}

fn compile_relation(
    relation: &RelationMatch,
    subquery: &str,
    name_column: &str,
    params: &mut Vec<Value>,
) -> String {
    let names = relation.names();
    let bind = |params: &mut Vec<Value>| {
        params.extend(names.iter().cloned().map(Value::Text));
        placeholders(names.len())
    };
    match relation {
        RelationMatch::Some(_) if names.is_empty() => "0".to_string(),
        RelationMatch::None(_) if names.is_empty() => "1".to_string(),
        RelationMatch::Every(_) if names.is_empty() => format!("NOT EXISTS ({subquery})"),
        RelationMatch::Some(_) => {
            format!("EXISTS ({subquery} AND {name_column} IN ({}))", bind(params))
        },
        RelationMatch::None(_) => {
            format!("NOT EXISTS ({subquery} AND {name_column} IN ({}))", bind(params))
        },
        RelationMatch::Every(_) => {
            format!("NOT EXISTS ({subquery} AND {name_column} NOT IN ({}))", bind(params))
        },
    }
}

/// Subquery expanding one JSON array parameter into rows.
pub const JSON_LIST: &str = "(SELECT value FROM json_each(?))";

/// Encodes list operands as one JSON array parameter.
pub fn json_list(values: impl IntoIterator<Item = Scalar>) -> Value {
    let array: Vec<serde_json::Value> = values
        .into_iter()
        .map(|scalar| match scalar {
            Scalar::Integer(n) => serde_json::Value::from(n),
            Scalar::Text(text) => serde_json::Value::String(text),
        })
        .collect();
    Value::Text(serde_json::Value::Array(array).to_string())
}

/// Builds an `ORDER BY` clause ending with the `id` tie-breaker.
#[must_use]
pub fn order_clause(order_by: &[OrderBy]) -> String {
    let mut keys: Vec<String> = order_by
        .iter()
        .map(|key| {
            let direction = match key.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            format!("{} {direction}", column(key.field))
        })
        .collect();
    keys.push("items.id ASC".to_string());
    format!("ORDER BY {}", keys.join(", "))
}

/// Returns `n` comma-separated `?` placeholders.
#[must_use]
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn column(field: ItemField) -> String {
    format!("items.{}", field.as_str())
}

fn to_value(scalar: Scalar) -> Value {
    match scalar {
        Scalar::Integer(n) => Value::Integer(n),
        Scalar::Text(text) => Value::Text(text),
    }
}
