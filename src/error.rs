//! Error type shared by every layer of the crate.
//!
//! Backend errors are carried unchanged inside [`UowError`] so callers can inspect the
//! driver error that caused a failed read, bulk statement or save.

use std::error::Error as StdError;
use std::fmt;

/// Errors produced by sessions, repositories and units of work
#[derive(Debug)]
pub enum UowError {
    /// A caller-supplied argument violated a precondition
    InvalidArgument(String),
    /// The operation is not valid in the current tracker or lifecycle state
    InvalidOperation(String),
    /// SQLite error from `rusqlite`
    #[cfg(feature = "sqlite")]
    Sqlite(rusqlite::Error),
    /// `PostgreSQL` error from `may_postgres`
    #[cfg(feature = "postgres")]
    Postgres(may_postgres::Error),
    /// Query construction or execution error reported by this crate
    QueryError(String),
    /// Row decoding / entity (de)serialization error
    ParseError(String),
    /// An update or delete matched no row
    Concurrency(String),
    /// Transaction already committed or rolled back
    TransactionClosed,
    /// The cancellation token fired before the backend was reached
    Cancelled,
    /// The session or unit of work has been disposed
    Disposed,
    /// Configuration could not be loaded
    Config(config::ConfigError),
    /// Other errors
    Other(String),
}

impl fmt::Display for UowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UowError::InvalidArgument(s) => write!(f, "Invalid argument: {s}"),
            UowError::InvalidOperation(s) => write!(f, "Invalid operation: {s}"),
            #[cfg(feature = "sqlite")]
            UowError::Sqlite(e) => write!(f, "SQLite error: {e}"),
            #[cfg(feature = "postgres")]
            UowError::Postgres(e) => write!(f, "PostgreSQL error: {e}"),
            UowError::QueryError(s) => write!(f, "Query error: {s}"),
            UowError::ParseError(s) => write!(f, "Parse error: {s}"),
            UowError::Concurrency(s) => write!(f, "Concurrency error: {s}"),
            UowError::TransactionClosed => {
                write!(f, "Transaction has already been committed or rolled back")
            }
            UowError::Cancelled => write!(f, "Operation was cancelled"),
            UowError::Disposed => write!(f, "Session has been disposed"),
            UowError::Config(e) => write!(f, "Configuration error: {e}"),
            UowError::Other(s) => write!(f, "Execution error: {s}"),
        }
    }
}

impl StdError for UowError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            #[cfg(feature = "sqlite")]
            UowError::Sqlite(e) => Some(e),
            #[cfg(feature = "postgres")]
            UowError::Postgres(e) => Some(e),
            UowError::Config(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for UowError {
    fn from(err: rusqlite::Error) -> Self {
        UowError::Sqlite(err)
    }
}

#[cfg(feature = "postgres")]
impl From<may_postgres::Error> for UowError {
    fn from(err: may_postgres::Error) -> Self {
        UowError::Postgres(err)
    }
}

impl From<serde_json::Error> for UowError {
    fn from(err: serde_json::Error) -> Self {
        UowError::ParseError(err.to_string())
    }
}

impl From<config::ConfigError> for UowError {
    fn from(err: config::ConfigError) -> Self {
        UowError::Config(err)
    }
}

/// Flatten an error and its `source()` chain into one message per level.
///
/// Useful when reporting the failure held by a
/// [`SaveChangesResult`](crate::SaveChangesResult).
///
/// # Example
///
/// ```
/// use uow::{error_messages, UowError};
///
/// let err = UowError::QueryError("no such table: widgets".to_string());
/// assert_eq!(error_messages(&err), "Query error: no such table: widgets");
/// ```
pub fn error_messages(err: &(dyn StdError + 'static)) -> String {
    let mut lines = vec![err.to_string()];
    let mut current = err.source();
    while let Some(inner) = current {
        lines.push(inner.to_string());
        current = inner.source();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Outer(UowError);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "save failed")
        }
    }

    impl StdError for Outer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_uow_error_display() {
        let err = UowError::InvalidArgument("indexFrom: 2 > pageIndex: 1".to_string());
        assert!(err.to_string().contains("Invalid argument"));
        assert_eq!(UowError::Disposed.to_string(), "Session has been disposed");
        assert!(UowError::Cancelled.to_string().contains("cancelled"));
    }

    #[test]
    fn test_error_messages_walks_sources() {
        let err = Outer(UowError::Concurrency("0 rows affected".to_string()));
        let messages = error_messages(&err);
        let lines: Vec<&str> = messages.lines().collect();
        assert_eq!(lines, vec!["save failed", "Concurrency error: 0 rows affected"]);
    }

    #[test]
    fn test_serde_error_converts_to_parse_error() {
        let err: UowError = serde_json::from_str::<i32>("nope").unwrap_err().into();
        assert!(matches!(err, UowError::ParseError(_)));
    }
}
