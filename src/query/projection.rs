//! Projections: select a subset of columns (or computed expressions) into another type.

use super::entity_query::{aggregate_value, count_value, usize_count, EntityQuery};
use super::plan::{QueryPlan, SelectItem};
use crate::backend::Statement;
use crate::entity::Entity;
use crate::error::UowError;
use crate::paging::{Page, PagedResult};
use crate::value::from_row;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;

/// Select list of a projection.
///
/// ```
/// use uow::Selector;
///
/// let selector = Selector::columns(["id", "name"]).expr("price * quantity", "total");
/// assert_eq!(selector.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    items: Vec<SelectItem>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: columns
                .into_iter()
                .map(|c| SelectItem::Column(c.into()))
                .collect(),
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.items.push(SelectItem::Column(column.into()));
        self
    }

    /// A SQL expression selected under `alias`. The expression is inserted verbatim.
    pub fn expr(mut self, sql: impl Into<String>, alias: impl Into<String>) -> Self {
        self.items.push(SelectItem::Expr {
            sql: sql.into(),
            alias: alias.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A query over `E` that materializes rows as `P`.
///
/// Ordering and filtering come from the source query; paging applies to the projected rows.
pub struct ProjectedQuery<E: Entity, P> {
    source: EntityQuery<E>,
    selector: Selector,
    skip: Option<u64>,
    take: Option<u64>,
    _projection: PhantomData<fn() -> P>,
}

impl<E: Entity, P> Clone for ProjectedQuery<E, P> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            selector: self.selector.clone(),
            skip: self.skip,
            take: self.take,
            _projection: PhantomData,
        }
    }
}

impl<E: Entity, P: DeserializeOwned + Send> ProjectedQuery<E, P> {
    pub(crate) fn new(source: EntityQuery<E>, selector: Selector) -> Self {
        Self {
            source,
            selector,
            skip: None,
            take: None,
            _projection: PhantomData,
        }
    }

    pub fn skip(mut self, count: u64) -> Self {
        self.skip = Some(count);
        self
    }

    pub fn take(mut self, count: u64) -> Self {
        self.take = Some(count);
        self
    }

    fn plan(&self) -> Result<QueryPlan, UowError> {
        if self.selector.is_empty() {
            return Err(UowError::InvalidArgument(
                "a projection needs at least one column or expression".to_string(),
            ));
        }
        let mut plan = self.source.resolved_plan();
        plan.projection = Some(self.selector.items.clone());
        if self.skip.is_some() {
            plan.skip = self.skip;
        }
        if self.take.is_some() {
            plan.take = self.take;
        }
        Ok(plan)
    }

    pub fn to_statement(&self) -> Result<Statement, UowError> {
        Ok(self.plan()?.statement(self.source.session().dialect(), E::COLUMNS))
    }

    fn count_statement(&self) -> Result<Statement, UowError> {
        Ok(self
            .plan()?
            .unpaged()
            .count_statement(self.source.session().dialect(), E::COLUMNS))
    }

    pub fn to_list(&self) -> Result<Vec<P>, UowError> {
        let rows = self.source.session().query(&self.to_statement()?)?;
        rows.into_iter().map(from_row).collect()
    }

    pub async fn to_list_async(&self, cancel: &CancellationToken) -> Result<Vec<P>, UowError> {
        let statement = self.to_statement()?;
        let rows = self.source.session().query_async(&statement, cancel).await?;
        rows.into_iter().map(from_row).collect()
    }

    pub fn first(&self) -> Result<Option<P>, UowError> {
        Ok(self.clone().take(1).to_list()?.into_iter().next())
    }

    pub async fn first_async(&self, cancel: &CancellationToken) -> Result<Option<P>, UowError> {
        Ok(self.clone().take(1).to_list_async(cancel).await?.into_iter().next())
    }

    /// Rows in the projected set, ignoring paging
    pub fn count(&self) -> Result<usize, UowError> {
        let rows = self.source.session().query(&self.count_statement()?)?;
        usize_count(count_value(rows)?)
    }

    pub async fn count_async(&self, cancel: &CancellationToken) -> Result<usize, UowError> {
        let statement = self.count_statement()?;
        let rows = self.source.session().query_async(&statement, cancel).await?;
        usize_count(count_value(rows)?)
    }

    /// Aggregate over a projected column or alias
    pub fn max<T: DeserializeOwned>(&self, column: &str) -> Result<Option<T>, UowError> {
        let statement = self.plan()?.unpaged().aggregate_statement(
            self.source.session().dialect(),
            E::COLUMNS,
            "MAX",
            column,
        );
        aggregate_value(self.source.session().query(&statement)?)
    }

    fn paged(&self, page: &Page) -> Self {
        self.clone()
            .skip(page.offset() as u64)
            .take(page.size as u64)
    }

    pub fn to_paged_list(&self, page: Page) -> Result<PagedResult<P>, UowError> {
        page.validate()?;
        let total = self.count()?;
        let items = self.paged(&page).to_list()?;
        PagedResult::new(items, page.index, page.size, page.index_from, total)
    }

    pub async fn to_paged_list_async(
        &self,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<PagedResult<P>, UowError> {
        page.validate()?;
        let total = self.count_async(cancel).await?;
        let items = self.paged(&page).to_list_async(cancel).await?;
        PagedResult::new(items, page.index, page.size, page.index_from, total)
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;
    use crate::entity::PrimaryKey;
    use crate::session::Session;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Item {
        id: i64,
        name: String,
        price: f64,
        quantity: i64,
    }

    impl Entity for Item {
        type Key = i64;
        const TABLE: &'static str = "items";
        const COLUMNS: &'static [&'static str] = &["id", "name", "price", "quantity"];
        const PRIMARY_KEY: PrimaryKey = PrimaryKey {
            columns: &["id"],
            auto_increment: true,
        };

        fn key(&self) -> i64 {
            self.id
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Line {
        name: String,
        total: f64,
    }

    fn session() -> Session {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .execute_batch(
                "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL, price REAL NOT NULL, quantity INTEGER NOT NULL);
                 INSERT INTO items (name, price, quantity) VALUES ('bolt', 0.5, 10), ('nut', 0.25, 4), ('gear', 3.0, 2);",
            )
            .unwrap();
        Session::new(backend)
    }

    #[test]
    fn test_projection_selects_expressions() {
        let projected: ProjectedQuery<Item, Line> = EntityQuery::<Item>::new(session())
            .asc("name")
            .project(Selector::columns(["name"]).expr("price * quantity", "total"));

        let lines = projected.to_list().unwrap();
        assert_eq!(
            lines,
            vec![
                Line { name: "bolt".into(), total: 5.0 },
                Line { name: "gear".into(), total: 6.0 },
                Line { name: "nut".into(), total: 1.0 },
            ]
        );
        assert_eq!(projected.max::<f64>("total").unwrap(), Some(6.0));
    }

    #[test]
    fn test_projected_paging_counts_unpaged_set() {
        let page = EntityQuery::<Item>::new(session())
            .desc("price")
            .project::<Line>(Selector::columns(["name"]).expr("price", "total"))
            .to_paged_list(Page::new(1, 2))
            .unwrap();
        assert_eq!(page.total_count(), 3);
        assert_eq!(page.items(), &[Line { name: "nut".into(), total: 0.25 }]);
    }

    #[test]
    fn test_empty_selector_is_rejected() {
        let err = EntityQuery::<Item>::new(session())
            .project::<Line>(Selector::new())
            .to_list()
            .unwrap_err();
        assert!(matches!(err, UowError::InvalidArgument(_)));
    }
}
