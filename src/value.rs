//! Row representation and value conversion between JSON rows and SeaQuery values.
//!
//! Backends decode every result row into a [`Row`]: a JSON object keyed by column name.
//! Entities are mapped to and from rows with serde, so the tracker can compare snapshots
//! and build statements without knowing the concrete entity type.

use crate::entity::PrimaryKey;
use crate::error::UowError;
use sea_query::{Condition, Expr, ExprTrait, Iden, Value};
use serde_json::Value as JsonValue;

/// A decoded result row, keyed by column name
pub type Row = serde_json::Map<String, JsonValue>;

/// Owned identifier used for table, column and alias names resolved at runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident(pub String);

impl Ident {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl Iden for Ident {
    fn unquoted(&self) -> &str {
        &self.0
    }
}

/// Convert a JSON scalar into a SeaQuery bind value.
///
/// Integers that fit in `i32` bind as `Int` so `PostgreSQL` accepts them for `INTEGER`
/// columns; arrays and objects bind as their JSON text.
pub fn json_to_value(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::String(None),
        JsonValue::Bool(b) => Value::Bool(Some(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                match i32::try_from(i) {
                    Ok(small) => Value::Int(Some(small)),
                    Err(_) => Value::BigInt(Some(i)),
                }
            } else if let Some(u) = n.as_u64() {
                Value::BigUnsigned(Some(u))
            } else {
                Value::Double(n.as_f64())
            }
        }
        JsonValue::String(s) => Value::String(Some(s.clone())),
        JsonValue::Array(_) | JsonValue::Object(_) => Value::String(Some(value.to_string())),
    }
}

/// Serialize an entity into its row form.
pub fn to_row<T: serde::Serialize>(entity: &T) -> Result<Row, UowError> {
    match serde_json::to_value(entity)? {
        JsonValue::Object(map) => Ok(map),
        other => Err(UowError::ParseError(format!(
            "entity must serialize to a JSON object, got {other}"
        ))),
    }
}

/// Decode a row into any deserializable type.
pub fn from_row<T: serde::de::DeserializeOwned>(row: Row) -> Result<T, UowError> {
    serde_json::from_value(JsonValue::Object(row)).map_err(|e| UowError::ParseError(e.to_string()))
}

/// A key value that does not identify a row yet.
///
/// Null never does. Zero only stands for "not generated yet" on store-generated keys; a
/// plain key of 0 is a real identity.
pub(crate) fn is_unset_key(primary_key: &PrimaryKey, key: &JsonValue) -> bool {
    fn unset(value: &JsonValue, zero_is_unset: bool) -> bool {
        match value {
            JsonValue::Null => true,
            JsonValue::Number(n) => zero_is_unset && n.as_i64() == Some(0),
            JsonValue::Array(parts) => parts.iter().all(|part| unset(part, zero_is_unset)),
            _ => false,
        }
    }
    unset(key, primary_key.auto_increment)
}

/// Build `col = value [AND ...]` for a (possibly composite) primary key.
///
/// Composite keys serialize as JSON arrays whose elements line up with `columns`.
pub(crate) fn key_condition(columns: &[&str], key: &JsonValue) -> Result<Condition, UowError> {
    let parts: Vec<&JsonValue> = match (columns.len(), key) {
        (1, value) => vec![value],
        (n, JsonValue::Array(values)) if values.len() == n => values.iter().collect(),
        (n, _) => {
            return Err(UowError::InvalidArgument(format!(
                "key {key} does not match the {n} primary key column(s)"
            )))
        }
    };

    let mut condition = Condition::all();
    for (column, value) in columns.iter().zip(parts) {
        condition = condition.add(Expr::col(Ident::new(*column)).eq(Expr::val(json_to_value(value))));
    }
    Ok(condition)
}

/// Read the key out of a row, shaped like [`key_condition`] expects it.
pub(crate) fn key_from_row(columns: &[&str], row: &Row) -> JsonValue {
    if columns.len() == 1 {
        row.get(columns[0]).cloned().unwrap_or(JsonValue::Null)
    } else {
        JsonValue::Array(
            columns
                .iter()
                .map(|c| row.get(*c).cloned().unwrap_or(JsonValue::Null))
                .collect(),
        )
    }
}

/// Read a numeric scalar, accepting the integer, float or text forms backends return.
pub(crate) fn json_as_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => s.parse().ok(),
        JsonValue::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_query::{Query, SqliteQueryBuilder};
    use serde_json::json;

    #[test]
    fn test_json_to_value_scalars() {
        assert_eq!(json_to_value(&json!(7)), Value::Int(Some(7)));
        assert_eq!(json_to_value(&json!(5_000_000_000i64)), Value::BigInt(Some(5_000_000_000)));
        assert_eq!(json_to_value(&json!(1.5)), Value::Double(Some(1.5)));
        assert_eq!(json_to_value(&json!(true)), Value::Bool(Some(true)));
        assert_eq!(json_to_value(&json!("a")), Value::String(Some("a".to_string())));
        assert_eq!(json_to_value(&JsonValue::Null), Value::String(None));
    }

    const GENERATED: PrimaryKey = PrimaryKey {
        columns: &["id"],
        auto_increment: true,
    };
    const ASSIGNED: PrimaryKey = PrimaryKey {
        columns: &["order_id", "line_no"],
        auto_increment: false,
    };

    #[test]
    fn test_unset_key_detection() {
        assert!(is_unset_key(&GENERATED, &json!(0)));
        assert!(is_unset_key(&GENERATED, &JsonValue::Null));
        assert!(is_unset_key(&GENERATED, &json!([0, null])));
        assert!(!is_unset_key(&GENERATED, &json!(3)));
        assert!(!is_unset_key(&GENERATED, &json!("sku-1")));
    }

    #[test]
    fn test_zero_is_a_real_key_when_assigned() {
        assert!(!is_unset_key(&ASSIGNED, &json!(0)));
        assert!(!is_unset_key(&ASSIGNED, &json!([0, 0])));
        assert!(is_unset_key(&ASSIGNED, &JsonValue::Null));
        assert!(is_unset_key(&ASSIGNED, &json!([null, null])));
        assert!(!is_unset_key(&ASSIGNED, &json!([0, null])));
    }

    #[test]
    fn test_composite_key_condition() {
        let condition = key_condition(&["order_id", "line_no"], &json!([10, 2])).unwrap();
        let (sql, values) = Query::select()
            .column(Ident::new("order_id"))
            .from(Ident::new("order_lines"))
            .cond_where(condition)
            .build(SqliteQueryBuilder);
        assert_eq!(
            sql,
            r#"SELECT "order_id" FROM "order_lines" WHERE "order_id" = ? AND "line_no" = ?"#
        );
        assert_eq!(values.iter().count(), 2);
    }

    #[test]
    fn test_key_condition_rejects_shape_mismatch() {
        let err = key_condition(&["a", "b"], &json!(1)).unwrap_err();
        assert!(matches!(err, UowError::InvalidArgument(_)));
    }

    #[test]
    fn test_key_from_row() {
        let mut row = Row::new();
        row.insert("id".to_string(), json!(4));
        row.insert("name".to_string(), json!("bolt"));
        assert_eq!(key_from_row(&["id"], &row), json!(4));
        assert_eq!(key_from_row(&["id", "name"], &row), json!([4, "bolt"]));
    }
}
