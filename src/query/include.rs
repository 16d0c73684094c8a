//! Eager loading of related data.
//!
//! An [`Include`] runs after the main rows of a query are materialized and fills navigation
//! fields on the loaded items, typically with one extra query per include. The query layer
//! treats includes as opaque.

use crate::entity::Entity;
use crate::error::UowError;
use crate::session::Session;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Loads related data into already materialized entities
#[async_trait]
pub trait Include<E: Entity>: Send + Sync {
    fn load(&self, session: &Session, items: &mut [E]) -> Result<(), UowError>;

    async fn load_async(
        &self,
        session: &Session,
        items: &mut [E],
        cancel: &CancellationToken,
    ) -> Result<(), UowError> {
        if cancel.is_cancelled() {
            return Err(UowError::Cancelled);
        }
        self.load(session, items)
    }
}

/// Closure-backed include, see [`include_with`]
pub struct IncludeFn<F> {
    load: F,
}

impl<E, F> Include<E> for IncludeFn<F>
where
    E: Entity,
    F: Fn(&Session, &mut [E]) -> Result<(), UowError> + Send + Sync,
{
    fn load(&self, session: &Session, items: &mut [E]) -> Result<(), UowError> {
        if items.is_empty() {
            return Ok(());
        }
        (self.load)(session, items)
    }
}

/// Build an include from a closure.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use uow::{include_with, Entity, Include, Repository};
/// use uow::sea_query::{Expr, ExprTrait};
/// use uow::value::Ident;
///
/// #[derive(Debug, Clone, Serialize, Deserialize, Entity)]
/// #[table_name = "orders"]
/// struct Order {
///     #[primary_key]
///     id: i64,
///     #[navigation]
///     #[serde(default)]
///     lines: Vec<OrderLine>,
/// }
///
/// #[derive(Debug, Clone, Serialize, Deserialize, Entity)]
/// #[table_name = "order_lines"]
/// struct OrderLine {
///     #[primary_key]
///     id: i64,
///     order_id: i64,
/// }
///
/// let lines: std::sync::Arc<dyn Include<Order>> = include_with(|session, orders: &mut [Order]| {
///     let ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
///     let all = Repository::<OrderLine>::new(session.clone())
///         .query()
///         .filter(Expr::col(Ident::new("order_id")).is_in(ids))
///         .to_list()?;
///     for order in orders.iter_mut() {
///         order.lines = all.iter().filter(|l| l.order_id == order.id).cloned().collect();
///     }
///     Ok(())
/// });
/// ```
pub fn include_with<E, F>(load: F) -> Arc<dyn Include<E>>
where
    E: Entity,
    F: Fn(&Session, &mut [E]) -> Result<(), UowError> + Send + Sync + 'static,
{
    Arc::new(IncludeFn { load })
}
