//! SQLite backend over `rusqlite`.

use super::{Backend, Dialect, Statement};
use crate::error::UowError;
use crate::value::Row;
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use sea_query::Value;
use serde_json::{Number, Value as JsonValue};
use std::path::Path;
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Backend over a single SQLite connection
pub struct SqliteBackend {
    conn: Mutex<Option<Connection>>,
}

impl SqliteBackend {
    /// Wrap an open connection
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, UowError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self::new(conn))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, UowError> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    /// Run a batch of `;`-separated statements without bind values (schema setup)
    pub fn execute_batch(&self, sql: &str) -> Result<(), UowError> {
        self.with_conn(|conn| Ok(conn.execute_batch(sql)?))
    }

    fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> Result<R, UowError>) -> Result<R, UowError> {
        let guard = self.conn.lock();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(UowError::Disposed),
        }
    }

    fn timed<R>(&self, sql: &str, f: impl FnOnce() -> Result<R, UowError>) -> Result<R, UowError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_query_span(sql).entered();
        log::trace!("sqlite: {sql}");

        let start = Instant::now();
        let result = f();
        #[cfg(feature = "metrics")]
        {
            if result.is_err() {
                METRICS.record_query_error();
            }
            METRICS.record_query_duration(start.elapsed());
        }
        #[cfg(not(feature = "metrics"))]
        let _ = start;
        result
    }
}

impl Backend for SqliteBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&self, statement: &Statement) -> Result<u64, UowError> {
        let params = convert_params(&statement.values)?;
        self.timed(&statement.sql, || {
            self.with_conn(|conn| {
                let mut stmt = conn.prepare(&statement.sql)?;
                let affected = stmt.execute(params_from_iter(params))?;
                Ok(affected as u64)
            })
        })
    }

    fn query(&self, statement: &Statement) -> Result<Vec<Row>, UowError> {
        let params = convert_params(&statement.values)?;
        self.timed(&statement.sql, || {
            self.with_conn(|conn| {
                let mut stmt = conn.prepare(&statement.sql)?;
                let columns: Vec<(String, ColumnKind)> = stmt
                    .columns()
                    .iter()
                    .map(|c| (c.name().to_string(), ColumnKind::from_decl(c.decl_type())))
                    .collect();

                let mut rows = stmt.query(params_from_iter(params))?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut decoded = Row::new();
                    for (idx, (name, kind)) in columns.iter().enumerate() {
                        decoded.insert(name.clone(), decode(row.get_ref(idx)?, *kind));
                    }
                    out.push(decoded);
                }
                Ok(out)
            })
        })
    }

    fn close(&self) {
        if let Some(conn) = self.conn.lock().take() {
            if let Err((_, e)) = conn.close() {
                log::warn!("sqlite: failed to close connection: {e}");
            }
        }
    }
}

/// Declared column affinity hints used to restore JSON types SQLite stores as integers or text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Boolean,
    Json,
    Other,
}

impl ColumnKind {
    fn from_decl(decl: Option<&str>) -> Self {
        match decl.map(str::to_ascii_uppercase) {
            Some(d) if d.contains("BOOL") => ColumnKind::Boolean,
            Some(d) if d.contains("JSON") => ColumnKind::Json,
            _ => ColumnKind::Other,
        }
    }
}

fn decode(value: ValueRef<'_>, kind: ColumnKind) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) if kind == ColumnKind::Boolean => JsonValue::Bool(i != 0),
        ValueRef::Integer(i) => JsonValue::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            if kind == ColumnKind::Json {
                serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
            } else {
                JsonValue::String(text)
            }
        }
        ValueRef::Blob(bytes) => {
            JsonValue::Array(bytes.iter().map(|b| JsonValue::Number((*b).into())).collect())
        }
    }
}

fn convert_params(values: &[Value]) -> Result<Vec<SqlValue>, UowError> {
    values.iter().map(convert_value).collect()
}

fn convert_value(value: &Value) -> Result<SqlValue, UowError> {
    let converted = match value {
        Value::Bool(Some(b)) => SqlValue::Integer(i64::from(*b)),
        Value::TinyInt(Some(i)) => SqlValue::Integer(i64::from(*i)),
        Value::SmallInt(Some(i)) => SqlValue::Integer(i64::from(*i)),
        Value::Int(Some(i)) => SqlValue::Integer(i64::from(*i)),
        Value::BigInt(Some(i)) => SqlValue::Integer(*i),
        Value::TinyUnsigned(Some(u)) => SqlValue::Integer(i64::from(*u)),
        Value::SmallUnsigned(Some(u)) => SqlValue::Integer(i64::from(*u)),
        Value::Unsigned(Some(u)) => SqlValue::Integer(i64::from(*u)),
        Value::BigUnsigned(Some(u)) => {
            let i = i64::try_from(*u).map_err(|_| {
                UowError::QueryError(format!(
                    "BigUnsigned value {u} exceeds i64::MAX ({}), cannot be stored by SQLite",
                    i64::MAX
                ))
            })?;
            SqlValue::Integer(i)
        }
        Value::Float(Some(f)) => SqlValue::Real(f64::from(*f)),
        Value::Double(Some(d)) => SqlValue::Real(*d),
        Value::String(Some(s)) => SqlValue::Text(s.clone()),
        Value::Char(Some(c)) => SqlValue::Text(c.to_string()),
        Value::Bytes(Some(b)) => SqlValue::Blob(b.clone()),
        Value::Json(Some(j)) => SqlValue::Text(j.to_string()),
        Value::Bool(None)
        | Value::TinyInt(None)
        | Value::SmallInt(None)
        | Value::Int(None)
        | Value::BigInt(None)
        | Value::TinyUnsigned(None)
        | Value::SmallUnsigned(None)
        | Value::Unsigned(None)
        | Value::BigUnsigned(None)
        | Value::Float(None)
        | Value::Double(None)
        | Value::String(None)
        | Value::Char(None)
        | Value::Bytes(None)
        | Value::Json(None) => SqlValue::Null,
        #[allow(unreachable_patterns)]
        other => {
            return Err(UowError::QueryError(format!(
                "Unsupported value type in query: {other:?}"
            )))
        }
    };
    Ok(converted)
}
