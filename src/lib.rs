//! # uow
//!
//! Unit of Work and Repository data-access layer over SeaQuery.
//!
//! A [`Session`] owns a backend connection, a change tracker and the model configuration
//! (table names, global query filters, auto-includes). A [`Repository`] reads and stages
//! writes for one entity type; a [`UnitOfWork`] hands out cached repositories and persists
//! every staged change in one transactional [`UnitOfWork::save_changes`].
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use uow::{backend::SqliteBackend, Entity, Page, QueryOptions, Session, UnitOfWork};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize, Entity)]
//! #[table_name = "widgets"]
//! pub struct Widget {
//!     #[primary_key]
//!     #[auto_increment]
//!     pub id: i64,
//!     pub name: String,
//! }
//!
//! # fn main() -> Result<(), uow::UowError> {
//! let backend = SqliteBackend::open_in_memory()?;
//! backend.execute_batch("CREATE TABLE widgets (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)")?;
//!
//! let mut uow = UnitOfWork::new(Session::new(backend));
//! let widgets = uow.repository::<Widget>()?;
//! for name in ["a", "b", "c"] {
//!     widgets.insert(Widget { id: 0, name: name.to_string() })?;
//! }
//! assert_eq!(uow.save_changes(), 3);
//!
//! let page = widgets.get_paged_list(QueryOptions::new(), Page::new(0, 2))?;
//! assert_eq!(page.total_count(), 3);
//! assert_eq!(page.total_pages(), 2);
//! assert!(page.has_next_page());
//! # Ok(())
//! # }
//! ```

extern crate self as uow;

pub mod backend;
pub mod config;
pub mod entity;
pub mod error;
pub mod factory;
pub mod metrics;
pub mod paging;
pub mod query;
pub mod registry;
pub mod repository;
pub mod session;
pub mod unit_of_work;
pub mod value;

pub use config::{ContextConfig, UnitOfWorkConfig};
pub use entity::{Entity, EntityState, Navigation, PrimaryKey};
pub use error::{error_messages, UowError};
pub use factory::UnitOfWorkFactory;
pub use paging::{Page, PagedResult};
pub use query::{
    include_with, EntityQuery, Include, IncludeFn, OrderBy, ProjectedQuery, QueryOptions, Selector,
    TrackingMode,
};
pub use registry::{
    ContextRegistration, DbContext, Registry, RegistryBuilder, Scope, ServiceLifetime,
    SharedUnitOfWork,
};
pub use repository::{EntityRepository, Repository};
pub use session::graph::{GraphNode, GraphWalker};
pub use session::transaction::DbTransaction;
pub use session::{EntityEntry, Session, TrackedEntry};
pub use unit_of_work::{SaveChangesResult, UnitOfWork};
pub use value::Row;

pub use uow_derive::Entity;

pub use sea_query;
pub use tokio_util::sync::CancellationToken;
