//! Graph tracking: walk a detached entity graph and let a callback assign states.
//!
//! The walk starts at the root and follows navigations reported by
//! [`Entity::visit_navigations`]. A node's children are only visited when the callback
//! assigned the node a state; nodes whose identity is already tracked are skipped.

use crate::entity::{Entity, EntityMeta, EntityState, Navigation};
use crate::error::UowError;
use crate::value::{from_row, is_unset_key, key_from_row, to_row, Row};
use serde_json::Value as JsonValue;
use std::any::TypeId;

/// An entity reached during graph tracking
#[derive(Debug)]
pub struct GraphNode {
    meta: EntityMeta,
    row: Row,
    key: JsonValue,
    depth: usize,
    state: Option<EntityState>,
}

impl GraphNode {
    pub fn type_name(&self) -> &'static str {
        self.meta.type_name
    }

    pub fn table(&self) -> &'static str {
        self.meta.table
    }

    /// Key value in its JSON form (arrays for composite keys)
    pub fn key(&self) -> &JsonValue {
        &self.key
    }

    /// Whether the key holds a real value rather than a store-generated placeholder
    pub fn is_key_set(&self) -> bool {
        !is_unset_key(&self.meta.primary_key, &self.key)
    }

    /// 0 for the root
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is<E: Entity>(&self) -> bool {
        self.meta.type_id == TypeId::of::<E>()
    }

    /// Decode the node as `E` if it is one
    pub fn entity<E: Entity>(&self) -> Option<E> {
        if self.is::<E>() {
            from_row(self.row.clone()).ok()
        } else {
            None
        }
    }

    pub fn state(&self) -> Option<EntityState> {
        self.state
    }

    /// Assign the state this entity is tracked with
    pub fn set_state(&mut self, state: EntityState) {
        self.state = Some(state);
    }
}

/// Visitor handed to [`Entity::visit_navigations`]
pub struct GraphWalker<'a> {
    callback: &'a mut dyn FnMut(&mut GraphNode),
    is_tracked: &'a dyn Fn(TypeId, &JsonValue) -> bool,
    seen: Vec<(TypeId, JsonValue)>,
    staged: Vec<(EntityMeta, Row, EntityState)>,
    depth: usize,
    error: Option<UowError>,
}

impl<'a> GraphWalker<'a> {
    pub(crate) fn new(
        callback: &'a mut dyn FnMut(&mut GraphNode),
        is_tracked: &'a dyn Fn(TypeId, &JsonValue) -> bool,
    ) -> Self {
        Self {
            callback,
            is_tracked,
            seen: Vec::new(),
            staged: Vec::new(),
            depth: 0,
            error: None,
        }
    }

    /// Visit a navigation property (`Vec<T>`, `Option<T>` or `Box<T>`)
    pub fn visit<N: Navigation + ?Sized>(&mut self, navigation: &N) {
        navigation.walk(self);
    }

    /// Visit one entity and, if the callback assigns it a state, its navigations
    pub fn node<E: Entity>(&mut self, entity: &E) {
        if self.error.is_some() {
            return;
        }
        let meta = EntityMeta::of::<E>();
        let row = match to_row(entity) {
            Ok(row) => row,
            Err(e) => {
                self.error = Some(e);
                return;
            }
        };
        let key = key_from_row(meta.primary_key.columns, &row);

        if !is_unset_key(&meta.primary_key, &key) {
            let identity = (meta.type_id, key.clone());
            if self.seen.contains(&identity) || (self.is_tracked)(meta.type_id, &key) {
                return;
            }
            self.seen.push(identity);
        }

        let mut node = GraphNode {
            meta,
            row,
            key,
            depth: self.depth,
            state: None,
        };
        (self.callback)(&mut node);

        let Some(state) = node.state else {
            return;
        };
        self.staged.push((node.meta, node.row, state));

        self.depth += 1;
        entity.visit_navigations(self);
        self.depth -= 1;
    }

    pub(crate) fn finish(self) -> Result<Vec<(EntityMeta, Row, EntityState)>, UowError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.staged),
        }
    }
}
