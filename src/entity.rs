//! The `Entity` trait and the metadata the session needs about each entity type.
//!
//! Implement it with `#[derive(Entity)]`:
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use uow::Entity;
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize, Entity)]
//! #[table_name = "widgets"]
//! #[key_stub]
//! pub struct Widget {
//!     #[primary_key]
//!     #[auto_increment]
//!     pub id: i64,
//!     pub name: String,
//! }
//!
//! assert_eq!(Widget::TABLE, "widgets");
//! assert_eq!(Widget::COLUMNS, &["id", "name"]);
//! assert!(Widget::key_accessor().is_some());
//! ```

use crate::session::graph::GraphWalker;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::TypeId;

/// Primary key descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryKey {
    /// Key column names, in key order
    pub columns: &'static [&'static str],
    /// Whether the store generates the key on insert
    pub auto_increment: bool,
}

/// Tracking state of an entity within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Not tracked
    Detached,
    /// Tracked and identical to the stored row
    Unchanged,
    /// Staged for insertion
    Added,
    /// Staged for update
    Modified,
    /// Staged for removal
    Deleted,
}

impl EntityState {
    /// States that `save_changes` writes
    pub fn is_pending(self) -> bool {
        matches!(self, EntityState::Added | EntityState::Modified | EntityState::Deleted)
    }
}

/// A persistent entity type.
///
/// Values cross into the session through serde: the serialized form must be a JSON object
/// whose keys include every name in [`Entity::COLUMNS`]. Navigation fields should be
/// `#[serde(default)]` so rows without them still decode.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Key type; composite keys are tuples and serialize as arrays
    type Key: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Default table name
    const TABLE: &'static str;

    /// Persisted columns
    const COLUMNS: &'static [&'static str];

    const PRIMARY_KEY: PrimaryKey;

    /// Extract the key of this value
    fn key(&self) -> Self::Key;

    /// Typed key accessor: builds a placeholder that bears only the given key.
    ///
    /// When present, delete-by-key stages the removal without loading the row.
    fn key_accessor() -> Option<fn(Self::Key) -> Self> {
        None
    }

    /// Visit related entities reachable from this one (used by `track_graph`)
    fn visit_navigations(&self, _walker: &mut GraphWalker<'_>) {}
}

/// Type-erased view of an [`Entity`] implementation
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntityMeta {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub primary_key: PrimaryKey,
}

impl EntityMeta {
    pub fn of<E: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            table: E::TABLE,
            columns: E::COLUMNS,
            primary_key: E::PRIMARY_KEY,
        }
    }

    /// Persisted columns that are not part of the key
    pub fn value_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns
            .iter()
            .copied()
            .filter(move |c| !self.primary_key.columns.contains(c))
    }
}

/// Navigation property container accepted by [`GraphWalker::visit`]
pub trait Navigation {
    fn walk(&self, walker: &mut GraphWalker<'_>);
}

impl<T: Entity> Navigation for Vec<T> {
    fn walk(&self, walker: &mut GraphWalker<'_>) {
        for item in self {
            walker.node(item);
        }
    }
}

impl<T: Entity> Navigation for Option<T> {
    fn walk(&self, walker: &mut GraphWalker<'_>) {
        if let Some(item) = self {
            walker.node(item);
        }
    }
}

impl<T: Entity> Navigation for Box<T> {
    fn walk(&self, walker: &mut GraphWalker<'_>) {
        walker.node(self.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct OrderLine {
        order_id: i64,
        line_no: i32,
        sku: String,
    }

    impl Entity for OrderLine {
        type Key = (i64, i32);
        const TABLE: &'static str = "order_lines";
        const COLUMNS: &'static [&'static str] = &["order_id", "line_no", "sku"];
        const PRIMARY_KEY: PrimaryKey = PrimaryKey {
            columns: &["order_id", "line_no"],
            auto_increment: false,
        };

        fn key(&self) -> Self::Key {
            (self.order_id, self.line_no)
        }
    }

    #[test]
    fn test_meta_value_columns_skip_key() {
        let meta = EntityMeta::of::<OrderLine>();
        assert_eq!(meta.value_columns().collect::<Vec<_>>(), vec!["sku"]);
        assert_eq!(meta.table, "order_lines");
        assert!(OrderLine::key_accessor().is_none());
    }

    #[test]
    fn test_pending_states() {
        assert!(EntityState::Added.is_pending());
        assert!(EntityState::Deleted.is_pending());
        assert!(!EntityState::Unchanged.is_pending());
        assert!(!EntityState::Detached.is_pending());
    }
}
