//! Change tracker: the per-session identity map and staged-change log.

use crate::entity::{EntityMeta, EntityState};
use crate::error::UowError;
use crate::value::{is_unset_key, key_from_row, Row};
use serde_json::Value as JsonValue;
use std::any::TypeId;

/// One tracked entity, stored in its row form
#[derive(Debug, Clone)]
pub(crate) struct TrackerEntry {
    pub id: u64,
    pub meta: EntityMeta,
    pub key: JsonValue,
    pub state: EntityState,
    pub current: Row,
    pub original: Option<Row>,
}

impl TrackerEntry {
    fn refresh_key(&mut self) {
        self.key = key_from_row(self.meta.primary_key.columns, &self.current);
    }
}

/// Snapshot of a tracked entry, for diagnostics and assertions
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntry {
    pub type_name: &'static str,
    pub table: &'static str,
    pub key: JsonValue,
    pub state: EntityState,
}

#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    entries: Vec<TrackerEntry>,
    next_id: u64,
}

impl ChangeTracker {
    pub fn find(&self, type_id: TypeId, key: &JsonValue) -> Option<&TrackerEntry> {
        self.position(type_id, key).map(|idx| &self.entries[idx])
    }

    fn position(&self, type_id: TypeId, key: &JsonValue) -> Option<usize> {
        self.entries.iter().position(|e| {
            e.meta.type_id == type_id && &e.key == key && !is_unset_key(&e.meta.primary_key, key)
        })
    }

    pub fn get(&self, id: u64) -> Option<&TrackerEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut TrackerEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub fn remove(&mut self, id: u64) {
        self.entries.retain(|e| e.id != id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TrackerEntry> {
        self.entries.iter()
    }

    pub fn of_type(&self, type_id: TypeId) -> impl Iterator<Item = &TrackerEntry> {
        self.entries.iter().filter(move |e| e.meta.type_id == type_id)
    }

    fn push(&mut self, meta: EntityMeta, row: Row, state: EntityState, original: Option<Row>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        let key = key_from_row(meta.primary_key.columns, &row);
        self.entries.push(TrackerEntry {
            id,
            meta,
            key,
            state,
            current: row,
            original,
        });
        id
    }

    /// Stage an insert. A value whose key is already tracked is rejected.
    pub fn add(&mut self, meta: EntityMeta, row: Row) -> Result<u64, UowError> {
        let key = key_from_row(meta.primary_key.columns, &row);
        if self.position(meta.type_id, &key).is_some() {
            return Err(UowError::InvalidOperation(format!(
                "an instance of {} with key {key} is already being tracked",
                meta.type_name
            )));
        }
        Ok(self.push(meta, row, EntityState::Added, None))
    }

    /// Mark as modified, attaching if needed. Added entries stay added.
    pub fn update(&mut self, meta: EntityMeta, row: Row) -> u64 {
        let key = key_from_row(meta.primary_key.columns, &row);
        if let Some(idx) = self.position(meta.type_id, &key) {
            let entry = &mut self.entries[idx];
            entry.current = row;
            if entry.state != EntityState::Added {
                entry.state = EntityState::Modified;
            }
            return entry.id;
        }
        let state = if meta.primary_key.auto_increment && is_unset_key(&meta.primary_key, &key) {
            EntityState::Added
        } else {
            EntityState::Modified
        };
        self.push(meta, row, state, None)
    }

    /// Stage a removal. Removing a staged insert just forgets it.
    pub fn delete(&mut self, meta: EntityMeta, row: Row) {
        let key = key_from_row(meta.primary_key.columns, &row);
        match self.position(meta.type_id, &key) {
            Some(idx) if self.entries[idx].state == EntityState::Added => {
                self.entries.remove(idx);
            }
            Some(idx) => self.entries[idx].state = EntityState::Deleted,
            None => {
                self.push(meta, row, EntityState::Deleted, None);
            }
        }
    }

    /// Force a state, attaching or detaching as needed
    pub fn set_state(&mut self, meta: EntityMeta, row: Row, state: EntityState) {
        let key = key_from_row(meta.primary_key.columns, &row);
        let existing = self.position(meta.type_id, &key);
        match (existing, state) {
            (Some(idx), EntityState::Detached) => {
                self.entries.remove(idx);
            }
            (None, EntityState::Detached) => {}
            (Some(idx), state) => {
                let entry = &mut self.entries[idx];
                entry.current = row;
                entry.state = state;
                if state == EntityState::Unchanged {
                    entry.original = Some(entry.current.clone());
                }
            }
            (None, state) => {
                let original = (state == EntityState::Unchanged).then(|| row.clone());
                self.push(meta, row, state, original);
            }
        }
    }

    /// Attach a freshly loaded row unless the identity is already tracked; returns the
    /// tracked current values.
    pub fn attach_loaded(&mut self, meta: EntityMeta, row: Row) -> Row {
        let key = key_from_row(meta.primary_key.columns, &row);
        if let Some(existing) = self.find(meta.type_id, &key) {
            return existing.current.clone();
        }
        self.push(meta, row.clone(), EntityState::Unchanged, Some(row.clone()));
        row
    }

    /// Flip unchanged entries whose values differ from their snapshot to modified
    pub fn detect_changes(&mut self) -> usize {
        let mut flipped = 0;
        for entry in &mut self.entries {
            if entry.state == EntityState::Unchanged
                && entry.original.as_ref() != Some(&entry.current)
            {
                entry.state = EntityState::Modified;
                flipped += 1;
            }
        }
        flipped
    }

    /// Entries `save_changes` must write, in the order they were tracked
    pub fn pending(&self) -> Vec<TrackerEntry> {
        self.entries
            .iter()
            .filter(|e| e.state.is_pending())
            .cloned()
            .collect()
    }

    /// Accept a successful write of an added entry: merge store-generated values
    pub fn accept_insert(&mut self, id: u64, returned: Row) {
        if let Some(entry) = self.get_mut(id) {
            for (column, value) in returned {
                if entry.meta.columns.contains(&column.as_str()) {
                    entry.current.insert(column, value);
                }
            }
            entry.refresh_key();
            entry.state = EntityState::Unchanged;
            entry.original = Some(entry.current.clone());
        }
    }

    pub fn accept_update(&mut self, id: u64) {
        if let Some(entry) = self.get_mut(id) {
            entry.state = EntityState::Unchanged;
            entry.original = Some(entry.current.clone());
        }
    }

    pub fn snapshot(&self) -> Vec<TrackedEntry> {
        self.entries
            .iter()
            .map(|e| TrackedEntry {
                type_name: e.meta.type_name,
                table: e.meta.table,
                key: e.key.clone(),
                state: e.state,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, PrimaryKey};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Part {
        id: i64,
        name: String,
    }

    impl Entity for Part {
        type Key = i64;
        const TABLE: &'static str = "parts";
        const COLUMNS: &'static [&'static str] = &["id", "name"];
        const PRIMARY_KEY: PrimaryKey = PrimaryKey {
            columns: &["id"],
            auto_increment: true,
        };

        fn key(&self) -> i64 {
            self.id
        }
    }

    fn row(id: i64, name: &str) -> Row {
        crate::value::to_row(&Part {
            id,
            name: name.to_string(),
        })
        .unwrap()
    }

    fn meta() -> EntityMeta {
        EntityMeta::of::<Part>()
    }

    /// Same rows, but the caller assigns the key
    fn assigned_meta() -> EntityMeta {
        let mut meta = meta();
        meta.primary_key.auto_increment = false;
        meta
    }

    #[test]
    fn test_add_rejects_duplicate_identity() {
        let mut tracker = ChangeTracker::default();
        tracker.add(meta(), row(1, "a")).unwrap();
        let err = tracker.add(meta(), row(1, "b")).unwrap_err();
        assert!(matches!(err, UowError::InvalidOperation(_)));
    }

    #[test]
    fn test_unset_keys_never_collide() {
        let mut tracker = ChangeTracker::default();
        tracker.add(meta(), row(0, "a")).unwrap();
        tracker.add(meta(), row(0, "b")).unwrap();
        assert_eq!(tracker.pending().len(), 2);
        assert!(tracker.find(meta().type_id, &json!(0)).is_none());
    }

    #[test]
    fn test_assigned_zero_key_is_an_identity() {
        let mut tracker = ChangeTracker::default();
        tracker.add(assigned_meta(), row(0, "a")).unwrap();
        let err = tracker.add(assigned_meta(), row(0, "b")).unwrap_err();
        assert!(matches!(err, UowError::InvalidOperation(_)));

        tracker.update(assigned_meta(), row(0, "c"));
        assert_eq!(tracker.len(), 1);
        let entry = tracker.find(meta().type_id, &json!(0)).unwrap();
        assert_eq!(entry.current["name"], json!("c"));
        assert_eq!(entry.state, EntityState::Added);
    }

    #[test]
    fn test_delete_of_added_forgets_it() {
        let mut tracker = ChangeTracker::default();
        tracker.add(meta(), row(5, "a")).unwrap();
        tracker.delete(meta(), row(5, "a"));
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn test_update_of_untracked_unset_key_becomes_added() {
        let mut tracker = ChangeTracker::default();
        let id = tracker.update(meta(), row(0, "fresh"));
        assert_eq!(tracker.get(id).unwrap().state, EntityState::Added);
        let id = tracker.update(meta(), row(9, "known"));
        assert_eq!(tracker.get(id).unwrap().state, EntityState::Modified);
    }

    #[test]
    fn test_detect_changes_flips_only_dirty_entries() {
        let mut tracker = ChangeTracker::default();
        tracker.attach_loaded(meta(), row(1, "a"));
        let dirty = tracker.attach_loaded(meta(), row(2, "b"));
        assert_eq!(dirty["name"], json!("b"));

        let id = tracker.find(meta().type_id, &json!(2)).unwrap().id;
        tracker.get_mut(id).unwrap().current = row(2, "changed");

        assert_eq!(tracker.detect_changes(), 1);
        let states: Vec<_> = tracker.snapshot().into_iter().map(|e| e.state).collect();
        assert_eq!(states, vec![EntityState::Unchanged, EntityState::Modified]);
    }

    #[test]
    fn test_attach_loaded_returns_tracked_values() {
        let mut tracker = ChangeTracker::default();
        tracker.set_state(meta(), row(3, "local edit"), EntityState::Modified);
        let current = tracker.attach_loaded(meta(), row(3, "from store"));
        assert_eq!(current["name"], json!("local edit"));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_accept_insert_writes_back_generated_key() {
        let mut tracker = ChangeTracker::default();
        let id = tracker.add(meta(), row(0, "a")).unwrap();
        let mut returned = row(17, "a");
        returned.insert("not_a_column".to_string(), json!(true));
        tracker.accept_insert(id, returned);

        let entry = tracker.get(id).unwrap();
        assert_eq!(entry.key, json!(17));
        assert_eq!(entry.state, EntityState::Unchanged);
        assert!(!entry.current.contains_key("not_a_column"));
    }
}
