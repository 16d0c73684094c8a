//! Session: one backend connection plus the change tracker and model configuration.
//!
//! A [`Session`] plays the role of a database context. It is a cheap, clonable handle;
//! repositories and units of work share it. Exactly one owner disposes it.

pub mod graph;
mod save;
pub(crate) mod tracker;
pub mod transaction;

use crate::backend::{Backend, BuildStatement, Dialect, Statement};
use crate::entity::{Entity, EntityMeta, EntityState};
use crate::error::UowError;
use crate::query::Include;
use crate::repository::{EntityRepository, Repository};
use crate::value::{from_row, key_from_row, to_row, Row};
use graph::{GraphNode, GraphWalker};
use parking_lot::{Mutex, RwLock};
use sea_query::Condition;
use serde_json::Value as JsonValue;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracker::{ChangeTracker, TrackerEntry};
use transaction::{DbTransaction, TransactionInner};

pub use tracker::TrackedEntry;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

type QueryFilter = Arc<dyn Fn() -> Condition + Send + Sync>;

/// Builds a custom repository for one entity type; the box holds an
/// `Arc<dyn EntityRepository<E>>`
pub(crate) type RepositoryFactory = Arc<dyn Fn(Session) -> Box<dyn Any + Send + Sync> + Send + Sync>;

#[derive(Default)]
struct ModelConfig {
    tables: HashMap<TypeId, String>,
    query_filters: HashMap<TypeId, Vec<QueryFilter>>,
    /// `Vec<Arc<dyn Include<E>>>` per entity type
    auto_includes: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

#[derive(Default)]
struct Services {
    factories: HashMap<TypeId, RepositoryFactory>,
    instances: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

pub(crate) struct SessionState {
    tracker: ChangeTracker,
    auto_detect_changes: bool,
    transactions: Vec<Weak<TransactionInner>>,
}

pub(crate) struct SessionInner {
    id: u64,
    pub(crate) backend: Arc<dyn Backend>,
    state: Mutex<SessionState>,
    model: RwLock<ModelConfig>,
    services: Mutex<Services>,
    disposed: AtomicBool,
}

impl SessionInner {
    /// Drop transactions at `depth` and deeper from the open stack
    pub(crate) fn pop_transactions(&self, depth: u32) {
        let removed: Vec<Weak<TransactionInner>> = {
            let mut state = self.state.lock();
            let keep = (depth as usize).saturating_sub(1).min(state.transactions.len());
            state.transactions.split_off(keep)
        };
        let closing: Vec<Arc<TransactionInner>> = removed.iter().filter_map(Weak::upgrade).collect();
        for tx in &closing {
            tx.mark_closed();
        }
    }
}

/// Shared handle to one database session.
///
/// # Examples
///
/// ```
/// use uow::{backend::SqliteBackend, Session};
///
/// # fn main() -> Result<(), uow::UowError> {
/// let backend = SqliteBackend::open_in_memory()?;
/// backend.execute_batch("CREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")?;
///
/// let session = Session::new(backend);
/// let affected = session.execute_sql("INSERT INTO widgets (name) VALUES (?)", vec!["gear".into()])?;
/// assert_eq!(affected, 1);
///
/// session.dispose();
/// assert!(session.is_disposed());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session over a backend
    pub fn new<B: Backend + 'static>(backend: B) -> Self {
        Self::from_backend(Arc::new(backend))
    }

    /// Create a session over a shared backend
    pub fn from_backend(backend: Arc<dyn Backend>) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!("session {id}: opened ({:?})", backend.dialect());
        Self {
            inner: Arc::new(SessionInner {
                id,
                backend,
                state: Mutex::new(SessionState {
                    tracker: ChangeTracker::default(),
                    auto_detect_changes: true,
                    transactions: Vec::new(),
                }),
                model: RwLock::new(ModelConfig::default()),
                services: Mutex::new(Services::default()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Open a backend from a connection URL (see [`crate::backend::connect`])
    pub fn connect(url: &str) -> Result<Self, UowError> {
        Ok(Self::from_backend(crate::backend::connect(url)?))
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.backend.dialect()
    }

    /// Whether two handles refer to the same session
    pub fn same_session(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_active(&self) -> Result<(), UowError> {
        if self.is_disposed() {
            Err(UowError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Release the session: roll back open transactions, forget tracked entities and close
    /// the backend. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let open: Vec<Arc<TransactionInner>> = {
            let mut state = self.inner.state.lock();
            state.tracker.clear();
            state.transactions.drain(..).filter_map(|w| w.upgrade()).collect()
        };
        // The outermost rollback ends every nested savepoint too.
        if let Some(outer) = open.first() {
            if !outer.is_closed() {
                if let Err(e) = DbTransaction::from_inner(Arc::clone(outer)).rollback() {
                    log::warn!("session {}: rollback on dispose failed: {e}", self.inner.id);
                }
            }
        }
        for tx in &open {
            tx.mark_closed();
        }
        drop(open);

        let instances = std::mem::take(&mut self.inner.services.lock().instances);
        drop(instances);

        self.inner.backend.close();
        log::debug!("session {}: disposed", self.inner.id);
    }

    // ---- statements -------------------------------------------------------------------

    pub(crate) fn render<S: BuildStatement>(&self, statement: &S) -> Statement {
        statement.to_statement(self.dialect())
    }

    pub(crate) fn execute(&self, statement: &Statement) -> Result<u64, UowError> {
        self.ensure_active()?;
        self.inner.backend.execute(statement)
    }

    pub(crate) fn query(&self, statement: &Statement) -> Result<Vec<Row>, UowError> {
        self.ensure_active()?;
        self.inner.backend.query(statement)
    }

    pub(crate) async fn execute_async(
        &self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<u64, UowError> {
        self.ensure_active()?;
        self.inner.backend.execute_async(statement, cancel).await
    }

    pub(crate) async fn query_async(
        &self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, UowError> {
        self.ensure_active()?;
        self.inner.backend.query_async(statement, cancel).await
    }

    /// Execute raw SQL with positional bind values; returns the affected row count
    pub fn execute_sql(&self, sql: &str, values: Vec<sea_query::Value>) -> Result<u64, UowError> {
        self.execute(&Statement::new(sql, values))
    }

    pub async fn execute_sql_async(
        &self,
        sql: &str,
        values: Vec<sea_query::Value>,
        cancel: &CancellationToken,
    ) -> Result<u64, UowError> {
        self.execute_async(&Statement::new(sql, values), cancel).await
    }

    // ---- transactions -----------------------------------------------------------------

    fn current_transaction(&self) -> (Option<DbTransaction>, u32) {
        let state = self.inner.state.lock();
        let depth = state.transactions.len() as u32;
        let current = state
            .transactions
            .last()
            .and_then(Weak::upgrade)
            .filter(|tx| !tx.is_closed())
            .map(DbTransaction::from_inner);
        (current, depth)
    }

    fn push_transaction(&self, tx: &DbTransaction) {
        self.inner
            .state
            .lock()
            .transactions
            .push(Arc::downgrade(tx.inner()));
    }

    /// Whether an explicit transaction is open
    pub fn in_transaction(&self) -> bool {
        self.current_transaction().0.is_some()
    }

    /// Start a transaction, or join the open one when `use_if_exists` is set.
    ///
    /// Starting while another transaction is open (and not joining) opens a savepoint.
    pub fn begin_transaction(&self, use_if_exists: bool) -> Result<DbTransaction, UowError> {
        self.ensure_active()?;
        let (current, depth) = self.current_transaction();
        if let (Some(tx), true) = (current, use_if_exists) {
            return Ok(tx);
        }
        let tx = DbTransaction::start(&self.inner, depth + 1)?;
        self.push_transaction(&tx);
        Ok(tx)
    }

    pub async fn begin_transaction_async(
        &self,
        use_if_exists: bool,
        cancel: &CancellationToken,
    ) -> Result<DbTransaction, UowError> {
        self.ensure_active()?;
        let (current, depth) = self.current_transaction();
        if let (Some(tx), true) = (current, use_if_exists) {
            return Ok(tx);
        }
        let tx = DbTransaction::start_async(&self.inner, depth + 1, cancel).await?;
        self.push_transaction(&tx);
        Ok(tx)
    }

    // ---- model configuration ----------------------------------------------------------

    /// Redirect an entity type to another table of the same database for this session
    pub fn change_table<E: Entity>(&self, table: impl Into<String>) {
        self.inner
            .model
            .write()
            .tables
            .insert(TypeId::of::<E>(), table.into());
    }

    /// Table an entity type currently maps to
    pub fn table_name<E: Entity>(&self) -> String {
        self.table_for(&EntityMeta::of::<E>())
    }

    pub(crate) fn table_for(&self, meta: &EntityMeta) -> String {
        self.inner
            .model
            .read()
            .tables
            .get(&meta.type_id)
            .cloned()
            .unwrap_or_else(|| meta.table.to_string())
    }

    /// Register a global query filter, applied to every query of `E` unless ignored
    pub fn add_query_filter<E: Entity>(&self, filter: impl Fn() -> Condition + Send + Sync + 'static) {
        self.inner
            .model
            .write()
            .query_filters
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Arc::new(filter));
    }

    pub(crate) fn query_filters<E: Entity>(&self) -> Vec<Condition> {
        self.inner
            .model
            .read()
            .query_filters
            .get(&TypeId::of::<E>())
            .map(|filters| filters.iter().map(|f| f()).collect())
            .unwrap_or_default()
    }

    /// Register an include that every query of `E` loads unless auto-includes are ignored
    pub fn add_auto_include<E: Entity>(&self, include: Arc<dyn Include<E>>) {
        let mut model = self.inner.model.write();
        let slot = model
            .auto_includes
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<Arc<dyn Include<E>>>::new()));
        if let Some(list) = slot.downcast_mut::<Vec<Arc<dyn Include<E>>>>() {
            list.push(include);
        }
    }

    pub(crate) fn auto_includes<E: Entity>(&self) -> Vec<Arc<dyn Include<E>>> {
        self.inner
            .model
            .read()
            .auto_includes
            .get(&TypeId::of::<E>())
            .and_then(|slot| slot.downcast_ref::<Vec<Arc<dyn Include<E>>>>())
            .cloned()
            .unwrap_or_default()
    }

    // ---- services ---------------------------------------------------------------------

    /// Register a custom repository for `E`, resolved by
    /// `UnitOfWork::get_repository(true)`
    pub fn register_repository<E, R, F>(&self, factory: F)
    where
        E: Entity,
        R: EntityRepository<E> + 'static,
        F: Fn(Repository<E>) -> R + Send + Sync + 'static,
    {
        let erased: RepositoryFactory = Arc::new(move |session: Session| {
            let repository: Arc<dyn EntityRepository<E>> = Arc::new(factory(Repository::new(session)));
            Box::new(repository) as Box<dyn Any + Send + Sync>
        });
        self.install_repository_factory(TypeId::of::<E>(), erased);
    }

    pub(crate) fn install_repository_factory(&self, type_id: TypeId, factory: RepositoryFactory) {
        let mut services = self.inner.services.lock();
        services.instances.remove(&type_id);
        services.factories.insert(type_id, factory);
    }

    /// The custom repository registered for `E`, created once per session
    pub fn custom_repository<E: Entity>(&self) -> Option<Arc<dyn EntityRepository<E>>> {
        let type_id = TypeId::of::<E>();
        let factory = {
            let services = self.inner.services.lock();
            if let Some(existing) = services
                .instances
                .get(&type_id)
                .and_then(|b| b.downcast_ref::<Arc<dyn EntityRepository<E>>>())
            {
                return Some(Arc::clone(existing));
            }
            Arc::clone(services.factories.get(&type_id)?)
        };

        let created = factory(self.clone());
        let repository = created
            .downcast_ref::<Arc<dyn EntityRepository<E>>>()
            .cloned()?;
        if !self.is_disposed() {
            self.inner
                .services
                .lock()
                .instances
                .entry(type_id)
                .or_insert(created);
        }
        Some(repository)
    }

    // ---- change tracking --------------------------------------------------------------

    pub fn auto_detect_changes(&self) -> bool {
        self.inner.state.lock().auto_detect_changes
    }

    pub fn set_auto_detect_changes(&self, enabled: bool) {
        self.inner.state.lock().auto_detect_changes = enabled;
    }

    /// Compare tracked values against their snapshots and mark differences modified
    pub fn detect_changes(&self) -> usize {
        self.inner.state.lock().tracker.detect_changes()
    }

    /// Whether anything is staged for the next save
    pub fn has_changes(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.auto_detect_changes {
            state.tracker.detect_changes();
        }
        !state.tracker.pending().is_empty()
    }

    /// Snapshot of every tracked entry, in tracking order
    pub fn tracked_entries(&self) -> Vec<TrackedEntry> {
        self.inner.state.lock().tracker.snapshot()
    }

    /// Forget every tracked entity
    pub fn clear_tracker(&self) {
        self.inner.state.lock().tracker.clear();
    }

    pub(crate) fn track_added<E: Entity>(&self, entity: &E) -> Result<u64, UowError> {
        self.ensure_active()?;
        let row = to_row(entity)?;
        self.inner.state.lock().tracker.add(EntityMeta::of::<E>(), row)
    }

    pub(crate) fn track_modified<E: Entity>(&self, entity: &E) -> Result<(), UowError> {
        self.ensure_active()?;
        let row = to_row(entity)?;
        self.inner.state.lock().tracker.update(EntityMeta::of::<E>(), row);
        Ok(())
    }

    pub(crate) fn track_deleted<E: Entity>(&self, entity: &E) -> Result<(), UowError> {
        self.ensure_active()?;
        let row = to_row(entity)?;
        self.inner.state.lock().tracker.delete(EntityMeta::of::<E>(), row);
        Ok(())
    }

    pub(crate) fn track_state<E: Entity>(&self, entity: &E, state: EntityState) -> Result<(), UowError> {
        self.ensure_active()?;
        let row = to_row(entity)?;
        self.inner
            .state
            .lock()
            .tracker
            .set_state(EntityMeta::of::<E>(), row, state);
        Ok(())
    }

    /// Attach a loaded entity as unchanged, or return the tracked instance for its identity
    pub(crate) fn attach_loaded<E: Entity>(&self, entity: E) -> Result<E, UowError> {
        let row = to_row(&entity)?;
        let meta = EntityMeta::of::<E>();
        let key = key_from_row(meta.primary_key.columns, &row);
        let mut state = self.inner.state.lock();
        if state.tracker.find(meta.type_id, &key).is_none() {
            state.tracker.attach_loaded(meta, row);
            return Ok(entity);
        }
        let current = state.tracker.attach_loaded(meta, row);
        drop(state);
        from_row(current)
    }

    /// Tracked instance for a key, skipping deleted entries
    pub(crate) fn find_tracked<E: Entity>(&self, key: &E::Key) -> Result<Option<E>, UowError> {
        let key = serde_json::to_value(key)?;
        let row = {
            let state = self.inner.state.lock();
            match state.tracker.find(TypeId::of::<E>(), &key) {
                Some(entry) if entry.state != EntityState::Deleted => Some(entry.current.clone()),
                _ => None,
            }
        };
        row.map(from_row).transpose()
    }

    pub(crate) fn local<E: Entity>(&self) -> Result<Vec<E>, UowError> {
        let rows: Vec<Row> = {
            let state = self.inner.state.lock();
            state
                .tracker
                .of_type(TypeId::of::<E>())
                .filter(|e| e.state != EntityState::Deleted)
                .map(|e| e.current.clone())
                .collect()
        };
        rows.into_iter().map(from_row).collect()
    }

    pub(crate) fn entry_id<E: Entity>(&self, key: &E::Key) -> Result<Option<u64>, UowError> {
        let key = serde_json::to_value(key)?;
        Ok(self
            .inner
            .state
            .lock()
            .tracker
            .find(TypeId::of::<E>(), &key)
            .map(|e| e.id))
    }

    fn with_entry<R>(&self, id: u64, f: impl FnOnce(&mut TrackerEntry) -> R) -> Result<R, UowError> {
        let mut state = self.inner.state.lock();
        state
            .tracker
            .get_mut(id)
            .map(f)
            .ok_or_else(|| UowError::InvalidOperation("entity is no longer tracked".to_string()))
    }

    /// Walk a detached graph from `root`; the callback assigns each node's state.
    ///
    /// Children of a node are only visited when the callback set a state on it. Identities
    /// that are already tracked are left alone.
    pub fn track_graph<E, F>(&self, root: &E, mut callback: F) -> Result<(), UowError>
    where
        E: Entity,
        F: FnMut(&mut GraphNode),
    {
        self.ensure_active()?;
        let tracked: Vec<(TypeId, JsonValue)> = {
            let state = self.inner.state.lock();
            state
                .tracker
                .entries()
                .map(|e| (e.meta.type_id, e.key.clone()))
                .collect()
        };
        let is_tracked = |type_id: TypeId, key: &JsonValue| {
            tracked.iter().any(|(t, k)| *t == type_id && k == key)
        };

        let mut walker = GraphWalker::new(&mut callback, &is_tracked);
        walker.node(root);
        let staged = walker.finish()?;

        let mut state = self.inner.state.lock();
        for (meta, row, entity_state) in staged {
            if entity_state == EntityState::Added {
                state.tracker.add(meta, row)?;
            } else {
                state.tracker.set_state(meta, row, entity_state);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("dialect", &self.dialect())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Handle to one tracked entity
pub struct EntityEntry<E: Entity> {
    session: Session,
    id: u64,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for EntityEntry<E> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            id: self.id,
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> EntityEntry<E> {
    pub(crate) fn new(session: Session, id: u64) -> Self {
        Self {
            session,
            id,
            _entity: PhantomData,
        }
    }

    /// Current state; `Detached` once the entry is no longer tracked
    pub fn state(&self) -> EntityState {
        self.session
            .with_entry(self.id, |e| e.state)
            .unwrap_or(EntityState::Detached)
    }

    /// Current values, including store-generated keys after a save
    pub fn entity(&self) -> Result<E, UowError> {
        let row = self.session.with_entry(self.id, |e| e.current.clone())?;
        from_row(row)
    }

    /// Values as last loaded or saved
    pub fn original(&self) -> Result<Option<E>, UowError> {
        let row = self.session.with_entry(self.id, |e| e.original.clone())?;
        row.map(from_row).transpose()
    }

    /// Replace the current values. With automatic change detection on, the next save
    /// notices the difference.
    pub fn set_current(&self, entity: &E) -> Result<(), UowError> {
        let row = to_row(entity)?;
        self.session.with_entry(self.id, |e| e.current = row)
    }

    /// Override the state. Setting `Detached` stops tracking the entity.
    pub fn set_state(&self, state: EntityState) -> Result<(), UowError> {
        if state == EntityState::Detached {
            self.session.inner.state.lock().tracker.remove(self.id);
            return Ok(());
        }
        self.session.with_entry(self.id, |e| {
            e.state = state;
            if state == EntityState::Unchanged {
                e.original = Some(e.current.clone());
            }
        })
    }
}

impl<E: Entity> std::fmt::Debug for EntityEntry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityEntry")
            .field("type", &std::any::type_name::<E>())
            .field("state", &self.state())
            .finish()
    }
}
