//! Renders composed queries into statements.
//!
//! A raw SQL source is spliced in as a derived table named `raw_source`, so predicates,
//! ordering and paging compose over it the same way they do over a table. Counts and
//! aggregates wrap the composed query in a subquery, which keeps them correct for paged and
//! raw sources alike.

use crate::backend::{BuildStatement, Dialect, Statement};
use crate::value::Ident;
use sea_query::{Condition, Expr, Order, Query, SelectStatement};

pub(crate) const RAW_SOURCE: &str = "raw_source";

#[derive(Debug, Clone)]
pub(crate) enum Source {
    Table(String),
    Raw(Statement),
}

/// One entry of a projection's select list
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SelectItem {
    Column(String),
    Expr { sql: String, alias: String },
}

#[derive(Debug, Clone)]
pub(crate) struct QueryPlan {
    pub source: Source,
    pub conditions: Vec<Condition>,
    pub orderings: Vec<(String, Order)>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub projection: Option<Vec<SelectItem>>,
}

impl QueryPlan {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            conditions: Vec::new(),
            orderings: Vec::new(),
            skip: None,
            take: None,
            projection: None,
        }
    }

    /// Same query without ordering and paging
    pub fn unpaged(&self) -> Self {
        Self {
            orderings: Vec::new(),
            skip: None,
            take: None,
            ..self.clone()
        }
    }

    fn select(&self, columns: &[&str]) -> SelectStatement {
        let mut query = Query::select();
        match &self.projection {
            Some(items) => {
                for item in items {
                    match item {
                        SelectItem::Column(name) => {
                            query.column(Ident::new(name.as_str()));
                        }
                        SelectItem::Expr { sql, alias } => {
                            query.expr_as(Expr::cust(sql.clone()), Ident::new(alias.as_str()));
                        }
                    }
                }
            }
            None => {
                query.columns(columns.iter().map(|c| Ident::new(*c)));
            }
        }

        match &self.source {
            Source::Table(table) => query.from(Ident::new(table.as_str())),
            Source::Raw(_) => query.from(Ident::new(RAW_SOURCE)),
        };

        match self.conditions.as_slice() {
            [] => {}
            [single] => {
                query.cond_where(single.clone());
            }
            many => {
                let condition = many.iter().cloned().fold(Condition::all(), |all, c| all.add(c));
                query.cond_where(condition);
            }
        }

        for (column, order) in &self.orderings {
            query.order_by(Ident::new(column.as_str()), order.clone());
        }

        match (self.skip, self.take) {
            (None, None) => {}
            (skip, Some(take)) => {
                query.limit(take);
                if let Some(skip) = skip {
                    query.offset(skip);
                }
            }
            (Some(skip), None) => {
                query.limit(i64::MAX as u64).offset(skip);
            }
        }
        query
    }

    /// The composed `SELECT`, selecting `columns` unless a projection is set
    pub fn statement(&self, dialect: Dialect, columns: &[&str]) -> Statement {
        let rendered = self.select(columns).to_statement(dialect);
        match &self.source {
            Source::Table(_) => rendered,
            Source::Raw(raw) => splice_raw(raw, rendered, dialect),
        }
    }

    /// `SELECT COUNT(*)` over the query
    pub fn count_statement(&self, dialect: Dialect, columns: &[&str]) -> Statement {
        let inner = self.statement(dialect, columns);
        Statement::new(
            format!(
                r#"SELECT COUNT(*) AS "count" FROM ({}) AS "count_subquery""#,
                inner.sql
            ),
            inner.values,
        )
    }

    /// `SELECT <function>("column")` over the query
    pub fn aggregate_statement(
        &self,
        dialect: Dialect,
        columns: &[&str],
        function: &str,
        column: &str,
    ) -> Statement {
        let inner = self.statement(dialect, columns);
        Statement::new(
            format!(
                r#"SELECT {function}({}) AS "value" FROM ({}) AS "aggregate_subquery""#,
                quote_ident(column),
                inner.sql
            ),
            inner.values,
        )
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Put the raw SQL in place of the `raw_source` table. Its bind values come first since it
/// precedes every other placeholder in the statement.
fn splice_raw(raw: &Statement, rendered: Statement, dialect: Dialect) -> Statement {
    let sql = match dialect {
        Dialect::Postgres => shift_placeholders(&rendered.sql, raw.values.len()),
        Dialect::Sqlite => rendered.sql,
    };
    let needle = format!("FROM {}", quote_ident(RAW_SOURCE));
    let replacement = format!("FROM ({}) AS {}", raw.sql, quote_ident(RAW_SOURCE));
    let sql = sql.replacen(&needle, &replacement, 1);

    let mut values = raw.values.clone();
    values.extend(rendered.values);
    Statement::new(sql, values)
}

/// Renumber `$n` placeholders to `$n+offset`
fn shift_placeholders(sql: &str, offset: usize) -> String {
    if offset == 0 {
        return sql.to_string();
    }
    let mut out = String::with_capacity(sql.len() + 8);
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if c != '$' {
            continue;
        }
        let mut digits = String::new();
        while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
            digits.push(d);
            chars.next();
        }
        match digits.parse::<usize>() {
            Ok(n) => out.push_str(&(n + offset).to_string()),
            Err(_) => out.push_str(&digits),
        }
    }
    out
}
