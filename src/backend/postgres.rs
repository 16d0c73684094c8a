//! `PostgreSQL` backend over `may_postgres`.
//!
//! Queries are wrapped so the server renders each row with `row_to_json`, which keeps row
//! decoding independent of column types:
//!
//! ```sql
//! WITH q AS (<statement>) SELECT row_to_json(q)::text FROM q
//! ```
//!
//! The wrapper also accepts data-modifying statements with `RETURNING`.
//!
//! Rows reach the backend as JSON, so a bind value only knows its JSON shape. Every
//! statement is prepared first and each value is bound against the parameter type the
//! server inferred. Values with no native binding for that type (`NUMERIC`, `JSONB`,
//! dates, enums, ...) are sent as text behind an explicit cast:
//!
//! ```sql
//! ... WHERE "booked_on" = CAST($1::text AS "pg_catalog"."date")
//! ```

use super::{Backend, Dialect, Statement};
use crate::error::UowError;
use crate::value::Row;
use may_postgres::types::{ToSql, Type};
use may_postgres::Client;
use parking_lot::RwLock;
use sea_query::Value;
use serde_json::Value as JsonValue;
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Backend over one `may_postgres` client
pub struct PostgresBackend {
    client: RwLock<Option<Client>>,
}

impl PostgresBackend {
    /// Create a backend from a connected client
    pub fn new(client: Client) -> Self {
        Self {
            client: RwLock::new(Some(client)),
        }
    }

    /// Connect with a `postgres://` URL
    pub fn connect(url: &str) -> Result<Self, UowError> {
        let client = may_postgres::connect(url)?;
        Ok(Self::new(client))
    }

    /// Run `f` with the client, or fail once the backend has been closed
    pub fn with_client<R>(&self, f: impl FnOnce(&Client) -> Result<R, UowError>) -> Result<R, UowError> {
        let guard = self.client.read();
        match guard.as_ref() {
            Some(client) => f(client),
            None => Err(UowError::Disposed),
        }
    }

    fn timed<R>(&self, sql: &str, f: impl FnOnce() -> Result<R, UowError>) -> Result<R, UowError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_query_span(sql).entered();
        log::trace!("postgres: {sql}");

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

impl Backend for PostgresBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn execute(&self, statement: &Statement) -> Result<u64, UowError> {
        self.timed(&statement.sql, || {
            self.with_client(|client| {
                let bound = Bound::prepare(client, &statement.sql, &statement.values)?;
                let params = bound.params();
                let affected = match &bound.rewritten {
                    Some(sql) => client.execute(sql.as_str(), &params)?,
                    None => client.execute(&bound.prepared, &params)?,
                };
                Ok(affected)
            })
        })
    }

    fn query(&self, statement: &Statement) -> Result<Vec<Row>, UowError> {
        let wrapped = format!(
            "WITH q AS ({}) SELECT row_to_json(q)::text FROM q",
            statement.sql
        );
        self.timed(&statement.sql, || {
            self.with_client(|client| {
                let bound = Bound::prepare(client, &wrapped, &statement.values)?;
                let params = bound.params();
                let rows = match &bound.rewritten {
                    Some(sql) => client.query(sql.as_str(), &params)?,
                    None => client.query(&bound.prepared, &params)?,
                };
                rows.iter()
                    .map(|row| {
                        let text: String = row.get(0);
                        match serde_json::from_str::<JsonValue>(&text)? {
                            JsonValue::Object(map) => Ok(map),
                            other => Err(UowError::ParseError(format!(
                                "row_to_json returned a non-object: {other}"
                            ))),
                        }
                    })
                    .collect()
            })
        })
    }

    fn close(&self) {
        if self.client.write().take().is_some() {
            log::debug!("postgres: connection closed");
        }
    }
}

/// A prepared statement with its values bound to the inferred parameter types
struct Bound {
    prepared: may_postgres::Statement,
    /// Statement text with cast placeholders, when any value goes over as text
    rewritten: Option<String>,
    values: Vec<Box<dyn ToSql>>,
}

impl Bound {
    fn prepare(client: &Client, sql: &str, values: &[Value]) -> Result<Self, UowError> {
        let prepared = client.prepare(sql)?;
        let types = prepared.params();
        if types.len() != values.len() {
            return Err(UowError::QueryError(format!(
                "statement expects {} parameter(s) but {} value(s) were supplied",
                types.len(),
                values.len()
            )));
        }

        let mut bound = Vec::with_capacity(values.len());
        let mut casts = Vec::new();
        for (index, (value, ty)) in values.iter().zip(types).enumerate() {
            match bind(Scalar::from_value(value)?, ty) {
                Param::Native(param) => bound.push(param),
                Param::Text(text) => {
                    casts.push((index + 1, cast_target(ty)));
                    bound.push(Box::new(text) as Box<dyn ToSql>);
                }
            }
        }

        let rewritten = (!casts.is_empty()).then(|| cast_placeholders(sql, &casts));
        Ok(Self {
            prepared,
            rewritten,
            values: bound,
        })
    }

    fn params(&self) -> Vec<&dyn ToSql> {
        self.values.iter().map(|value| &**value).collect()
    }
}

/// A bind value reduced to what its JSON form can carry
#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Scalar {
    fn from_value(value: &Value) -> Result<Self, UowError> {
        let scalar = match value {
            Value::Bool(Some(b)) => Scalar::Bool(*b),
            Value::TinyInt(Some(i)) => Scalar::Int(i64::from(*i)),
            Value::SmallInt(Some(i)) => Scalar::Int(i64::from(*i)),
            Value::Int(Some(i)) => Scalar::Int(i64::from(*i)),
            Value::BigInt(Some(i)) => Scalar::Int(*i),
            Value::TinyUnsigned(Some(u)) => Scalar::Int(i64::from(*u)),
            Value::SmallUnsigned(Some(u)) => Scalar::Int(i64::from(*u)),
            Value::Unsigned(Some(u)) => Scalar::Int(i64::from(*u)),
            Value::BigUnsigned(Some(u)) => Scalar::Int(i64::try_from(*u).map_err(|_| {
                UowError::QueryError(format!(
                    "BigUnsigned value {u} exceeds i64::MAX ({}), cannot be safely cast to i64",
                    i64::MAX
                ))
            })?),
            Value::Float(Some(v)) => Scalar::Float(f64::from(*v)),
            Value::Double(Some(v)) => Scalar::Float(*v),
            Value::String(Some(s)) => Scalar::Text(s.clone()),
            Value::Char(Some(c)) => Scalar::Text(c.to_string()),
            Value::Json(Some(j)) => Scalar::Text(j.to_string()),
            Value::Bytes(Some(b)) => Scalar::Bytes(b.clone()),
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
            | Value::Json(None) => Scalar::Null,
            #[allow(unreachable_patterns)]
            other => {
                return Err(UowError::QueryError(format!(
                    "Unsupported value type in query: {other:?}"
                )))
            }
        };
        Ok(scalar)
    }

    /// Text form the server parses on the way into any type
    fn into_text(self) -> Option<String> {
        match self {
            Scalar::Null => None,
            Scalar::Bool(b) => Some(b.to_string()),
            Scalar::Int(i) => Some(i.to_string()),
            Scalar::Float(f) => Some(f.to_string()),
            Scalar::Text(s) => Some(s),
            Scalar::Bytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
                Some(format!("\\x{hex}"))
            }
        }
    }
}

#[derive(Debug)]
enum Param {
    /// Bound in the binary format of the inferred type
    Native(Box<dyn ToSql>),
    /// Sent as text and cast server-side
    Text(Option<String>),
}

fn bind(scalar: Scalar, ty: &Type) -> Param {
    match native(&scalar, ty) {
        Some(param) => Param::Native(param),
        None => Param::Text(scalar.into_text()),
    }
}

fn native(scalar: &Scalar, ty: &Type) -> Option<Box<dyn ToSql>> {
    match *ty {
        Type::BOOL => match scalar {
            Scalar::Null => Some(Box::new(None::<bool>)),
            Scalar::Bool(b) => Some(Box::new(*b)),
            _ => None,
        },
        Type::INT2 => integer::<i16>(scalar),
        Type::INT4 => integer::<i32>(scalar),
        Type::INT8 => integer::<i64>(scalar),
        Type::FLOAT4 => match scalar {
            Scalar::Null => Some(Box::new(None::<f32>)),
            Scalar::Float(f) => Some(Box::new(*f as f32)),
            Scalar::Int(i) => Some(Box::new(*i as f32)),
            _ => None,
        },
        Type::FLOAT8 => match scalar {
            Scalar::Null => Some(Box::new(None::<f64>)),
            Scalar::Float(f) => Some(Box::new(*f)),
            Scalar::Int(i) => Some(Box::new(*i as f64)),
            _ => None,
        },
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => match scalar {
            Scalar::Null => Some(Box::new(None::<String>)),
            Scalar::Text(s) => Some(Box::new(s.clone())),
            _ => None,
        },
        Type::BYTEA => match scalar {
            Scalar::Null => Some(Box::new(None::<Vec<u8>>)),
            Scalar::Bytes(b) => Some(Box::new(b.clone())),
            _ => None,
        },
        _ => None,
    }
}

/// Integers bind at the column's width; out-of-range values go over as text so the server
/// reports the overflow
fn integer<T>(scalar: &Scalar) -> Option<Box<dyn ToSql>>
where
    T: ToSql + TryFrom<i64> + 'static,
{
    match scalar {
        Scalar::Null => Some(Box::new(None::<T>)),
        Scalar::Int(i) => T::try_from(*i).ok().map(|v| Box::new(v) as Box<dyn ToSql>),
        _ => None,
    }
}

/// Fully qualified type name usable in a `CAST`
fn cast_target(ty: &Type) -> String {
    format!("\"{}\".\"{}\"", ty.schema(), ty.name())
}

/// Replace each listed `$n` placeholder with `CAST($n::text AS <type>)`.
///
/// Quoted literals and identifiers are copied untouched.
fn cast_placeholders(sql: &str, casts: &[(usize, String)]) -> String {
    let mut out = String::with_capacity(sql.len() + casts.len() * 32);
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                out.push(c);
            }
            None if c == '$' && !prev.is_some_and(|p| p.is_alphanumeric() || p == '_') => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                let target = digits
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| casts.iter().find(|(index, _)| *index == n));
                match target {
                    Some((_, ty)) => out.push_str(&format!("CAST(${digits}::text AS {ty})")),
                    None => {
                        out.push('$');
                        out.push_str(&digits);
                    }
                }
                prev = digits.chars().last().or(Some(c));
                continue;
            }
            None => out.push(c),
        }
        prev = Some(c);
    }
    out
}
