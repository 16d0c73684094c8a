//! Lazy, composable queries over one entity type.

use super::include::{include_with, Include};
use super::plan::{QueryPlan, Source};
use super::projection::{ProjectedQuery, Selector};
use super::TrackingMode;
use crate::backend::Statement;
use crate::entity::Entity;
use crate::error::UowError;
use crate::paging::{Page, PagedResult};
use crate::session::Session;
use crate::value::{from_row, is_unset_key, json_as_i64, key_from_row, Row};
use sea_query::{IntoCondition, Order};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A query over `E` that runs when materialized.
///
/// Builders consume and return the query, so it composes like an iterator chain. Nothing
/// touches the backend until one of the materializing methods (`to_list`, `first`, `count`,
/// `to_paged_list`, ...) is called. Global query filters registered on the session are
/// applied at that point unless [`EntityQuery::ignore_query_filters`] was called.
pub struct EntityQuery<E: Entity> {
    session: Session,
    plan: QueryPlan,
    tracking: TrackingMode,
    includes: Vec<Arc<dyn Include<E>>>,
    ignore_query_filters: bool,
    ignore_auto_includes: bool,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for EntityQuery<E> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            plan: self.plan.clone(),
            tracking: self.tracking,
            includes: self.includes.clone(),
            ignore_query_filters: self.ignore_query_filters,
            ignore_auto_includes: self.ignore_auto_includes,
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> EntityQuery<E> {
    pub(crate) fn new(session: Session) -> Self {
        let table = session.table_name::<E>();
        Self::with_source(session, Source::Table(table))
    }

    pub(crate) fn from_raw(session: Session, statement: Statement) -> Self {
        Self::with_source(session, Source::Raw(statement))
    }

    fn with_source(session: Session, source: Source) -> Self {
        Self {
            session,
            plan: QueryPlan::new(source),
            tracking: TrackingMode::default(),
            includes: Vec::new(),
            ignore_query_filters: false,
            ignore_auto_includes: false,
            _entity: PhantomData,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Add a predicate; several predicates are combined with `AND`
    pub fn filter<C: IntoCondition>(mut self, condition: C) -> Self {
        self.plan.conditions.push(condition.into_condition());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.plan.orderings.push((column.into(), order));
        self
    }

    pub fn asc(self, column: impl Into<String>) -> Self {
        self.order_by(column, Order::Asc)
    }

    pub fn desc(self, column: impl Into<String>) -> Self {
        self.order_by(column, Order::Desc)
    }

    pub fn skip(mut self, count: u64) -> Self {
        self.plan.skip = Some(count);
        self
    }

    pub fn take(mut self, count: u64) -> Self {
        self.plan.take = Some(count);
        self
    }

    pub fn with_tracking(mut self, mode: TrackingMode) -> Self {
        self.tracking = mode;
        self
    }

    /// Attach results to the session as `Unchanged`
    pub fn as_tracking(self) -> Self {
        self.with_tracking(TrackingMode::Tracking)
    }

    pub fn as_no_tracking(self) -> Self {
        self.with_tracking(TrackingMode::NoTracking)
    }

    pub fn include(mut self, include: Arc<dyn Include<E>>) -> Self {
        self.includes.push(include);
        self
    }

    pub fn include_with<F>(self, load: F) -> Self
    where
        F: Fn(&Session, &mut [E]) -> Result<(), UowError> + Send + Sync + 'static,
    {
        self.include(include_with(load))
    }

    pub fn ignore_query_filters(mut self) -> Self {
        self.ignore_query_filters = true;
        self
    }

    pub fn ignore_auto_includes(mut self) -> Self {
        self.ignore_auto_includes = true;
        self
    }

    /// Select into another shape. Projected queries are never tracked and skip includes.
    pub fn project<P: DeserializeOwned + Send>(self, selector: Selector) -> ProjectedQuery<E, P> {
        ProjectedQuery::new(self, selector)
    }

    pub(crate) fn tracking(&self) -> TrackingMode {
        self.tracking
    }

    /// The plan with global query filters applied
    pub(crate) fn resolved_plan(&self) -> QueryPlan {
        let mut plan = self.plan.clone();
        if !self.ignore_query_filters {
            let mut filters = self.session.query_filters::<E>();
            filters.append(&mut plan.conditions);
            plan.conditions = filters;
        }
        plan
    }

    /// The `SELECT` this query runs
    pub fn to_statement(&self) -> Statement {
        self.resolved_plan().statement(self.session.dialect(), E::COLUMNS)
    }

    fn count_statement(&self) -> Statement {
        self.resolved_plan()
            .count_statement(self.session.dialect(), E::COLUMNS)
    }

    fn aggregate_statement(&self, function: &str, column: &str) -> Statement {
        self.resolved_plan()
            .aggregate_statement(self.session.dialect(), E::COLUMNS, function, column)
    }

    fn includes(&self) -> Vec<Arc<dyn Include<E>>> {
        let mut includes = if self.ignore_auto_includes {
            Vec::new()
        } else {
            self.session.auto_includes::<E>()
        };
        includes.extend(self.includes.iter().cloned());
        includes
    }

    fn materialize(&self, rows: Vec<Row>) -> Result<Vec<E>, UowError> {
        match self.tracking {
            TrackingMode::NoTracking => rows.into_iter().map(from_row).collect(),
            TrackingMode::NoTrackingWithIdentityResolution => {
                let mut resolved: Vec<E> = Vec::with_capacity(rows.len());
                let mut by_key: HashMap<String, usize> = HashMap::new();
                for row in rows {
                    let key = key_from_row(E::PRIMARY_KEY.columns, &row);
                    if is_unset_key(&E::PRIMARY_KEY, &key) {
                        resolved.push(from_row(row)?);
                        continue;
                    }
                    match by_key.get(&key.to_string()) {
                        Some(&first) => {
                            let same = resolved[first].clone();
                            resolved.push(same);
                        }
                        None => {
                            by_key.insert(key.to_string(), resolved.len());
                            resolved.push(from_row(row)?);
                        }
                    }
                }
                Ok(resolved)
            }
            TrackingMode::Tracking => rows
                .into_iter()
                .map(|row| self.session.attach_loaded(from_row::<E>(row)?))
                .collect(),
        }
    }

    /// Run the query and load includes
    pub fn to_list(&self) -> Result<Vec<E>, UowError> {
        let rows = self.session.query(&self.to_statement())?;
        let mut items = self.materialize(rows)?;
        for include in self.includes() {
            include.load(&self.session, &mut items)?;
        }
        Ok(items)
    }

    pub async fn to_list_async(&self, cancel: &CancellationToken) -> Result<Vec<E>, UowError> {
        let rows = self.session.query_async(&self.to_statement(), cancel).await?;
        let mut items = self.materialize(rows)?;
        for include in self.includes() {
            include.load_async(&self.session, &mut items, cancel).await?;
        }
        Ok(items)
    }

    /// First result, or `None` when the query is empty
    pub fn first(&self) -> Result<Option<E>, UowError> {
        Ok(self.clone().take(1).to_list()?.into_iter().next())
    }

    pub async fn first_async(&self, cancel: &CancellationToken) -> Result<Option<E>, UowError> {
        Ok(self.clone().take(1).to_list_async(cancel).await?.into_iter().next())
    }

    pub fn long_count(&self) -> Result<u64, UowError> {
        count_value(self.session.query(&self.count_statement())?)
    }

    pub async fn long_count_async(&self, cancel: &CancellationToken) -> Result<u64, UowError> {
        count_value(self.session.query_async(&self.count_statement(), cancel).await?)
    }

    pub fn count(&self) -> Result<usize, UowError> {
        usize_count(self.long_count()?)
    }

    pub async fn count_async(&self, cancel: &CancellationToken) -> Result<usize, UowError> {
        usize_count(self.long_count_async(cancel).await?)
    }

    pub fn exists(&self) -> Result<bool, UowError> {
        Ok(self.clone().take(1).long_count()? > 0)
    }

    pub async fn exists_async(&self, cancel: &CancellationToken) -> Result<bool, UowError> {
        Ok(self.clone().take(1).long_count_async(cancel).await? > 0)
    }

    fn aggregate<T: DeserializeOwned>(&self, function: &str, column: &str) -> Result<Option<T>, UowError> {
        aggregate_value(self.session.query(&self.aggregate_statement(function, column))?)
    }

    async fn aggregate_async<T: DeserializeOwned>(
        &self,
        function: &str,
        column: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, UowError> {
        let statement = self.aggregate_statement(function, column);
        aggregate_value(self.session.query_async(&statement, cancel).await?)
    }

    /// `MAX(column)`; `None` over an empty set
    pub fn max<T: DeserializeOwned>(&self, column: &str) -> Result<Option<T>, UowError> {
        self.aggregate("MAX", column)
    }

    pub fn min<T: DeserializeOwned>(&self, column: &str) -> Result<Option<T>, UowError> {
        self.aggregate("MIN", column)
    }

    /// `SUM(column)`; `None` over an empty set
    pub fn sum<T: DeserializeOwned>(&self, column: &str) -> Result<Option<T>, UowError> {
        self.aggregate("SUM", column)
    }

    pub fn average(&self, column: &str) -> Result<Option<f64>, UowError> {
        self.aggregate("AVG", column)
    }

    pub async fn max_async<T: DeserializeOwned>(
        &self,
        column: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, UowError> {
        self.aggregate_async("MAX", column, cancel).await
    }

    pub async fn min_async<T: DeserializeOwned>(
        &self,
        column: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, UowError> {
        self.aggregate_async("MIN", column, cancel).await
    }

    pub async fn sum_async<T: DeserializeOwned>(
        &self,
        column: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, UowError> {
        self.aggregate_async("SUM", column, cancel).await
    }

    pub async fn average_async(
        &self,
        column: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<f64>, UowError> {
        self.aggregate_async("AVG", column, cancel).await
    }

    fn unpaged(&self) -> Self {
        let mut query = self.clone();
        query.plan = query.plan.unpaged();
        query
    }

    fn page_of(&self, page: &Page) -> Self {
        let mut query = self.clone();
        query.plan.skip = Some(page.offset() as u64);
        query.plan.take = Some(page.size as u64);
        query
    }

    /// Count the whole filtered set and fetch one page of it.
    ///
    /// Any skip/take already on the query is replaced by the page.
    pub fn to_paged_list(&self, page: Page) -> Result<PagedResult<E>, UowError> {
        page.validate()?;
        let total = self.unpaged().count()?;
        let items = self.page_of(&page).to_list()?;
        PagedResult::new(items, page.index, page.size, page.index_from, total)
    }

    pub async fn to_paged_list_async(
        &self,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<PagedResult<E>, UowError> {
        page.validate()?;
        let total = self.unpaged().count_async(cancel).await?;
        let items = self.page_of(&page).to_list_async(cancel).await?;
        PagedResult::new(items, page.index, page.size, page.index_from, total)
    }
}

impl<E: Entity> std::fmt::Debug for EntityQuery<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityQuery")
            .field("entity", &std::any::type_name::<E>())
            .field("sql", &self.to_statement().sql)
            .field("tracking", &self.tracking)
            .finish()
    }
}

pub(crate) fn count_value(rows: Vec<Row>) -> Result<u64, UowError> {
    let count = rows
        .first()
        .and_then(|row| row.get("count"))
        .and_then(json_as_i64)
        .ok_or_else(|| UowError::QueryError("count query returned no value".to_string()))?;
    u64::try_from(count)
        .map_err(|_| UowError::QueryError(format!("Count cannot be negative: {count}")))
}

pub(crate) fn usize_count(count: u64) -> Result<usize, UowError> {
    usize::try_from(count)
        .map_err(|_| UowError::QueryError(format!("count {count} does not fit in usize")))
}

pub(crate) fn aggregate_value<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Option<T>, UowError> {
    let value = rows
        .into_iter()
        .next()
        .and_then(|mut row| row.remove("value"))
        .unwrap_or(JsonValue::Null);
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| UowError::ParseError(format!("aggregate value: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(key: &str, value: JsonValue) -> Row {
        let mut row = Row::new();
        row.insert(key.to_string(), value);
        row
    }

    #[test]
    fn test_count_value_accepts_integer_and_text() {
        assert_eq!(count_value(vec![row("count", json!(12))]).unwrap(), 12);
        assert_eq!(count_value(vec![row("count", json!("7"))]).unwrap(), 7);
        assert!(matches!(count_value(Vec::new()), Err(UowError::QueryError(_))));
        assert!(matches!(
            count_value(vec![row("count", json!(-1))]),
            Err(UowError::QueryError(_))
        ));
    }

    #[test]
    fn test_aggregate_null_is_none() {
        let none: Option<i64> = aggregate_value(vec![row("value", JsonValue::Null)]).unwrap();
        assert_eq!(none, None);
        let some: Option<f64> = aggregate_value(vec![row("value", json!(2))]).unwrap();
        assert_eq!(some, Some(2.0));
    }
}
