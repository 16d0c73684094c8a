//! Query engine backends.
//!
//! A [`Backend`] executes fully built [`Statement`]s. Sessions compose statements with
//! SeaQuery, render them for the backend's [`Dialect`], and hand them over together with
//! their bind values. Rows come back as JSON objects keyed by column name.

use crate::error::UowError;
use crate::value::Row;
use async_trait::async_trait;
use sea_query::{
    DeleteStatement, InsertStatement, PostgresQueryBuilder, SelectStatement, SqliteQueryBuilder,
    UpdateStatement, Value,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

/// SQL dialect a backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

/// A rendered statement with its positional bind values
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub values: Vec<Value>,
}

impl Statement {
    /// Create a statement from SQL text and values
    pub fn new(sql: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }

    /// A statement without bind values
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// Render SeaQuery statements for a dialect
pub(crate) trait BuildStatement {
    fn to_statement(&self, dialect: Dialect) -> Statement;
}

macro_rules! impl_build_statement {
    ($($ty:ty),*) => {
        $(
            impl BuildStatement for $ty {
                fn to_statement(&self, dialect: Dialect) -> Statement {
                    let (sql, values) = match dialect {
                        Dialect::Postgres => self.build(PostgresQueryBuilder),
                        Dialect::Sqlite => self.build(SqliteQueryBuilder),
                    };
                    Statement::new(sql, values.iter().cloned().collect())
                }
            }
        )*
    };
}

impl_build_statement!(SelectStatement, InsertStatement, UpdateStatement, DeleteStatement);

/// Trait for executing statements against a database.
///
/// Implementations must be usable from several handles of one session, hence
/// `Send + Sync`; they serialize access to their connection internally.
///
/// The async variants default to checking the cancellation token and then running the
/// blocking call, which is what both bundled backends do.
///
/// # Examples
///
/// ```
/// use uow::backend::{Backend, SqliteBackend, Statement};
///
/// # fn main() -> Result<(), uow::UowError> {
/// let backend = SqliteBackend::open_in_memory()?;
/// backend.execute(&Statement::raw("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)"))?;
/// backend.execute(&Statement::new(
///     "INSERT INTO t (name) VALUES (?)",
///     vec!["bolt".into()],
/// ))?;
/// let rows = backend.query(&Statement::raw("SELECT id, name FROM t"))?;
/// assert_eq!(rows[0]["name"], "bolt");
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Backend: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Execute a statement and return the number of rows affected
    fn execute(&self, statement: &Statement) -> Result<u64, UowError>;

    /// Execute a query and return all rows
    fn query(&self, statement: &Statement) -> Result<Vec<Row>, UowError>;

    async fn execute_async(
        &self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<u64, UowError> {
        if cancel.is_cancelled() {
            return Err(UowError::Cancelled);
        }
        self.execute(statement)
    }

    async fn query_async(
        &self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, UowError> {
        if cancel.is_cancelled() {
            return Err(UowError::Cancelled);
        }
        self.query(statement)
    }

    /// Release the connection. Called once when the owning session is disposed.
    fn close(&self) {}
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn execute(&self, statement: &Statement) -> Result<u64, UowError> {
        (**self).execute(statement)
    }

    fn query(&self, statement: &Statement) -> Result<Vec<Row>, UowError> {
        (**self).query(statement)
    }

    async fn execute_async(
        &self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<u64, UowError> {
        (**self).execute_async(statement, cancel).await
    }

    async fn query_async(
        &self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, UowError> {
        (**self).query_async(statement, cancel).await
    }

    fn close(&self) {
        (**self).close()
    }
}

/// Open a backend from a connection URL.
///
/// Supported forms: `sqlite::memory:`, `sqlite://<path>` and, with the `postgres`
/// feature, `postgres://…` / `postgresql://…`.
pub fn connect(url: &str) -> Result<Arc<dyn Backend>, UowError> {
    #[cfg(feature = "sqlite")]
    {
        if url == "sqlite::memory:" {
            return Ok(Arc::new(SqliteBackend::open_in_memory()?));
        }
        if let Some(path) = url.strip_prefix("sqlite://") {
            return Ok(Arc::new(SqliteBackend::open(path)?));
        }
    }
    #[cfg(feature = "postgres")]
    {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(Arc::new(PostgresBackend::connect(url)?));
        }
    }
    Err(UowError::InvalidArgument(format!(
        "unsupported connection url: {url}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Ident;
    use sea_query::{Expr, ExprTrait, Query};

    #[test]
    fn test_statement_renders_per_dialect() {
        let mut select = Query::select();
        select
            .column(Ident::new("id"))
            .from(Ident::new("widgets"))
            .and_where(Expr::col(Ident::new("id")).eq(1));

        let pg = select.to_statement(Dialect::Postgres);
        assert_eq!(pg.sql, r#"SELECT "id" FROM "widgets" WHERE "id" = $1"#);
        let lite = select.to_statement(Dialect::Sqlite);
        assert_eq!(lite.sql, r#"SELECT "id" FROM "widgets" WHERE "id" = ?"#);
        assert_eq!(lite.values, vec![Value::Int(Some(1))]);
    }

    #[test]
    fn test_connect_rejects_unknown_scheme() {
        let err = connect("mysql://localhost/db").err();
        assert!(matches!(err, Some(UowError::InvalidArgument(_))));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_connect_memory_sqlite() {
        let backend = connect("sqlite::memory:").unwrap();
        assert_eq!(backend.dialect(), Dialect::Sqlite);
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_async_default_observes_cancellation() {
        let backend = connect("sqlite::memory:").unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = backend
            .query_async(&Statement::raw("SELECT 1"), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, UowError::Cancelled));
    }
}
