//! Query composition.
//!
//! Repositories hand out [`EntityQuery`] values; read operations that take a
//! [`QueryOptions`] apply them in a fixed order: tracking, includes, predicate, ignore flags,
//! ordering, then projection and paging.

mod entity_query;
mod include;
mod plan;
mod projection;

pub use entity_query::EntityQuery;
pub use include::{include_with, Include, IncludeFn};
pub use projection::{ProjectedQuery, Selector};

use crate::entity::Entity;
use crate::error::UowError;
use crate::session::Session;
use sea_query::{Condition, IntoCondition};
use std::sync::Arc;

/// How materialized entities relate to the session's change tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrackingMode {
    /// Plain values, nothing is tracked
    #[default]
    NoTracking,
    /// Not tracked, but rows with the same key within one result resolve to equal values
    NoTrackingWithIdentityResolution,
    /// Attached as `Unchanged`; already tracked identities return the tracked values
    Tracking,
}

/// Ordering callback applied to the composed query
pub type OrderBy<E> = Box<dyn FnOnce(EntityQuery<E>) -> EntityQuery<E> + Send>;

/// Options shared by the repository read operations.
///
/// ```
/// use uow::{QueryOptions, TrackingMode};
/// use uow::sea_query::{Expr, ExprTrait};
/// # #[derive(Debug, Clone, serde::Serialize, serde::Deserialize, uow::Entity)]
/// # struct Widget { #[primary_key] id: i64, price: f64 }
///
/// let options = QueryOptions::<Widget>::new()
///     .filter(Expr::col("price").gt(10))
///     .order_by(|q| q.desc("price"))
///     .tracking(TrackingMode::Tracking);
/// # let _ = options;
/// ```
pub struct QueryOptions<E: Entity> {
    predicate: Option<Condition>,
    order_by: Option<OrderBy<E>>,
    includes: Vec<Arc<dyn Include<E>>>,
    tracking: TrackingMode,
    ignore_query_filters: bool,
    ignore_auto_includes: bool,
}

impl<E: Entity> Default for QueryOptions<E> {
    fn default() -> Self {
        Self {
            predicate: None,
            order_by: None,
            includes: Vec::new(),
            tracking: TrackingMode::NoTracking,
            ignore_query_filters: false,
            ignore_auto_includes: false,
        }
    }
}

impl<E: Entity> QueryOptions<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with only a predicate
    pub fn filtered<C: IntoCondition>(condition: C) -> Self {
        Self::new().filter(condition)
    }

    /// Set the predicate; calling it again adds to the previous one with `AND`
    pub fn filter<C: IntoCondition>(mut self, condition: C) -> Self {
        let condition = condition.into_condition();
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => Condition::all().add(existing).add(condition),
            None => condition,
        });
        self
    }

    pub fn order_by<F>(mut self, order: F) -> Self
    where
        F: FnOnce(EntityQuery<E>) -> EntityQuery<E> + Send + 'static,
    {
        self.order_by = Some(Box::new(order));
        self
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

    pub fn tracking(mut self, mode: TrackingMode) -> Self {
        self.tracking = mode;
        self
    }

    /// `true` keeps results out of the tracker (the default), `false` tracks them
    pub fn disable_tracking(self, disable: bool) -> Self {
        self.tracking(if disable {
            TrackingMode::NoTracking
        } else {
            TrackingMode::Tracking
        })
    }

    pub fn ignore_query_filters(mut self) -> Self {
        self.ignore_query_filters = true;
        self
    }

    pub fn ignore_auto_includes(mut self) -> Self {
        self.ignore_auto_includes = true;
        self
    }

    pub(crate) fn apply(self, query: EntityQuery<E>) -> EntityQuery<E> {
        let mut query = query.with_tracking(self.tracking);
        for include in self.includes {
            query = query.include(include);
        }
        if let Some(predicate) = self.predicate {
            query = query.filter(predicate);
        }
        if self.ignore_query_filters {
            query = query.ignore_query_filters();
        }
        if self.ignore_auto_includes {
            query = query.ignore_auto_includes();
        }
        match self.order_by {
            Some(order) => order(query),
            None => query,
        }
    }
}

impl<E: Entity> std::fmt::Debug for QueryOptions<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptions")
            .field("predicate", &self.predicate)
            .field("ordered", &self.order_by.is_some())
            .field("includes", &self.includes.len())
            .field("tracking", &self.tracking)
            .field("ignore_query_filters", &self.ignore_query_filters)
            .field("ignore_auto_includes", &self.ignore_auto_includes)
            .finish()
    }
}
