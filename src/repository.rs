//! Generic repository over one entity type.
//!
//! A [`Repository`] is a stateless façade over a [`Session`]: reads go straight to the
//! backend, writes are staged in the session's change tracker until the unit of work is
//! saved. The bulk statements (`execute_update` / `execute_delete`) are the exception and run
//! immediately.

use crate::backend::Statement;
use crate::entity::{Entity, EntityState};
use crate::error::UowError;
use crate::paging::{Page, PagedResult};
use crate::query::{EntityQuery, ProjectedQuery, QueryOptions, Selector, TrackingMode};
use crate::session::{EntityEntry, Session};
use crate::value::{key_condition, Ident};
use async_trait::async_trait;
use sea_query::{Condition, Expr, Query};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;

/// Repository for `E`.
///
/// # Examples
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use uow::{backend::SqliteBackend, Entity, Page, QueryOptions, UnitOfWork};
///
/// #[derive(Debug, Clone, Default, Serialize, Deserialize, Entity)]
/// #[table_name = "widgets"]
/// struct Widget {
///     #[primary_key]
///     #[auto_increment]
///     id: i64,
///     name: String,
/// }
///
/// # fn main() -> Result<(), uow::UowError> {
/// let backend = SqliteBackend::open_in_memory()?;
/// backend.execute_batch("CREATE TABLE widgets (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)")?;
/// let mut uow = UnitOfWork::new(uow::Session::new(backend));
///
/// let widgets = uow.repository::<Widget>()?;
/// for name in ["a", "b", "c"] {
///     widgets.insert(Widget { id: 0, name: name.into() })?;
/// }
/// assert_eq!(uow.save_changes(), 3);
///
/// let page = widgets.get_paged_list(QueryOptions::new().order_by(|q| q.asc("id")), Page::new(1, 2))?;
/// assert_eq!(page.total_count(), 3);
/// assert_eq!(page.items()[0].name, "c");
/// # Ok(())
/// # }
/// ```
pub struct Repository<E: Entity> {
    session: Session,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self::new(self.session.clone())
    }
}

impl<E: Entity> std::fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &std::any::type_name::<E>())
            .field("session", &self.session)
            .finish()
    }
}

impl<E: Entity> Repository<E> {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            _entity: PhantomData,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Unfiltered query over the entity's table
    pub fn query(&self) -> EntityQuery<E> {
        EntityQuery::new(self.session.clone())
    }

    /// Query over a raw SQL source. Further filters, ordering and paging compose on top.
    pub fn from_sql(&self, sql: impl Into<String>, values: Vec<sea_query::Value>) -> EntityQuery<E> {
        EntityQuery::from_raw(self.session.clone(), Statement::new(sql, values))
    }

    /// Point the entity at another table of the same database, for this session
    pub fn change_table(&self, table: impl Into<String>) {
        self.session.change_table::<E>(table);
    }

    // ---- reads ------------------------------------------------------------------------

    /// Lazy query with the options applied
    pub fn get_all(&self, options: QueryOptions<E>) -> EntityQuery<E> {
        options.apply(self.query())
    }

    pub fn get_all_list(&self, options: QueryOptions<E>) -> Result<Vec<E>, UowError> {
        self.get_all(options).to_list()
    }

    pub async fn get_all_async(
        &self,
        options: QueryOptions<E>,
        cancel: &CancellationToken,
    ) -> Result<Vec<E>, UowError> {
        let query = self.get_all(options);
        query.to_list_async(cancel).await
    }

    pub fn get_all_projected<P: DeserializeOwned + Send>(
        &self,
        selector: Selector,
        options: QueryOptions<E>,
    ) -> ProjectedQuery<E, P> {
        self.get_all(options).project(selector)
    }

    pub fn get_all_projected_list<P: DeserializeOwned + Send>(
        &self,
        selector: Selector,
        options: QueryOptions<E>,
    ) -> Result<Vec<P>, UowError> {
        self.get_all_projected(selector, options).to_list()
    }

    pub async fn get_all_projected_async<P: DeserializeOwned + Send>(
        &self,
        selector: Selector,
        options: QueryOptions<E>,
        cancel: &CancellationToken,
    ) -> Result<Vec<P>, UowError> {
        let query = self.get_all_projected::<P>(selector, options);
        query.to_list_async(cancel).await
    }

    /// Count the filtered set and return one page of the ordered set
    pub fn get_paged_list(&self, options: QueryOptions<E>, page: Page) -> Result<PagedResult<E>, UowError> {
        self.get_all(options).to_paged_list(page)
    }

    pub async fn get_paged_list_async(
        &self,
        options: QueryOptions<E>,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<PagedResult<E>, UowError> {
        let query = self.get_all(options);
        query.to_paged_list_async(page, cancel).await
    }

    pub fn get_paged_list_projected<P: DeserializeOwned + Send>(
        &self,
        selector: Selector,
        options: QueryOptions<E>,
        page: Page,
    ) -> Result<PagedResult<P>, UowError> {
        self.get_all_projected(selector, options).to_paged_list(page)
    }

    pub async fn get_paged_list_projected_async<P: DeserializeOwned + Send>(
        &self,
        selector: Selector,
        options: QueryOptions<E>,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<PagedResult<P>, UowError> {
        let query = self.get_all_projected::<P>(selector, options);
        query.to_paged_list_async(page, cancel).await
    }

    /// First match, or `None`
    pub fn get_first_or_default(&self, options: QueryOptions<E>) -> Result<Option<E>, UowError> {
        self.get_all(options).first()
    }

    pub async fn get_first_or_default_async(
        &self,
        options: QueryOptions<E>,
        cancel: &CancellationToken,
    ) -> Result<Option<E>, UowError> {
        let query = self.get_all(options);
        query.first_async(cancel).await
    }

    pub fn get_first_or_default_projected<P: DeserializeOwned + Send>(
        &self,
        selector: Selector,
        options: QueryOptions<E>,
    ) -> Result<Option<P>, UowError> {
        self.get_all_projected(selector, options).first()
    }

    pub async fn get_first_or_default_projected_async<P: DeserializeOwned + Send>(
        &self,
        selector: Selector,
        options: QueryOptions<E>,
        cancel: &CancellationToken,
    ) -> Result<Option<P>, UowError> {
        let query = self.get_all_projected::<P>(selector, options);
        query.first_async(cancel).await
    }

    fn by_key(&self, key: &E::Key) -> Result<EntityQuery<E>, UowError> {
        let key = serde_json::to_value(key)?;
        let condition = key_condition(E::PRIMARY_KEY.columns, &key)?;
        Ok(self.query().filter(condition).with_tracking(TrackingMode::Tracking))
    }

    /// Look up by key: tracked entities first, then the store. A loaded row is tracked as
    /// `Unchanged`.
    pub fn find(&self, key: &E::Key) -> Result<Option<E>, UowError> {
        if let Some(tracked) = self.session.find_tracked::<E>(key)? {
            return Ok(Some(tracked));
        }
        self.by_key(key)?.first()
    }

    pub async fn find_async(&self, key: &E::Key, cancel: &CancellationToken) -> Result<Option<E>, UowError> {
        if let Some(tracked) = self.session.find_tracked::<E>(key)? {
            return Ok(Some(tracked));
        }
        let query = self.by_key(key)?;
        query.first_async(cancel).await
    }

    fn filtered(&self, predicate: Option<Condition>) -> EntityQuery<E> {
        match predicate {
            Some(condition) => self.query().filter(condition),
            None => self.query(),
        }
    }

    pub fn count(&self, predicate: Option<Condition>) -> Result<usize, UowError> {
        self.filtered(predicate).count()
    }

    pub async fn count_async(
        &self,
        predicate: Option<Condition>,
        cancel: &CancellationToken,
    ) -> Result<usize, UowError> {
        let query = self.filtered(predicate);
        query.count_async(cancel).await
    }

    pub fn long_count(&self, predicate: Option<Condition>) -> Result<u64, UowError> {
        self.filtered(predicate).long_count()
    }

    pub async fn long_count_async(
        &self,
        predicate: Option<Condition>,
        cancel: &CancellationToken,
    ) -> Result<u64, UowError> {
        let query = self.filtered(predicate);
        query.long_count_async(cancel).await
    }

    pub fn exists(&self, predicate: Option<Condition>) -> Result<bool, UowError> {
        self.filtered(predicate).exists()
    }

    pub async fn exists_async(
        &self,
        predicate: Option<Condition>,
        cancel: &CancellationToken,
    ) -> Result<bool, UowError> {
        let query = self.filtered(predicate);
        query.exists_async(cancel).await
    }

    pub fn max<T: DeserializeOwned>(&self, column: &str, predicate: Option<Condition>) -> Result<Option<T>, UowError> {
        self.filtered(predicate).max(column)
    }

    pub fn min<T: DeserializeOwned>(&self, column: &str, predicate: Option<Condition>) -> Result<Option<T>, UowError> {
        self.filtered(predicate).min(column)
    }

    pub fn sum<T: DeserializeOwned>(&self, column: &str, predicate: Option<Condition>) -> Result<Option<T>, UowError> {
        self.filtered(predicate).sum(column)
    }

    pub fn average(&self, column: &str, predicate: Option<Condition>) -> Result<Option<f64>, UowError> {
        self.filtered(predicate).average(column)
    }

    pub async fn max_async<T: DeserializeOwned>(
        &self,
        column: &str,
        predicate: Option<Condition>,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, UowError> {
        let query = self.filtered(predicate);
        query.max_async(column, cancel).await
    }

    pub async fn min_async<T: DeserializeOwned>(
        &self,
        column: &str,
        predicate: Option<Condition>,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, UowError> {
        let query = self.filtered(predicate);
        query.min_async(column, cancel).await
    }

    pub async fn sum_async<T: DeserializeOwned>(
        &self,
        column: &str,
        predicate: Option<Condition>,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, UowError> {
        let query = self.filtered(predicate);
        query.sum_async(column, cancel).await
    }

    pub async fn average_async(
        &self,
        column: &str,
        predicate: Option<Condition>,
        cancel: &CancellationToken,
    ) -> Result<Option<f64>, UowError> {
        let query = self.filtered(predicate);
        query.average_async(column, cancel).await
    }

    /// Tracked entities of this type that are not staged for removal
    pub fn local(&self) -> Result<Vec<E>, UowError> {
        self.session.local::<E>()
    }

    /// Handle to the tracked entry for `key`, if any
    pub fn entry(&self, key: &E::Key) -> Result<Option<EntityEntry<E>>, UowError> {
        Ok(self
            .session
            .entry_id::<E>(key)?
            .map(|id| EntityEntry::new(self.session.clone(), id)))
    }

    // ---- staged writes ----------------------------------------------------------------

    /// Stage an insert. Store-generated keys appear on the returned entry after saving.
    pub fn insert(&self, entity: E) -> Result<EntityEntry<E>, UowError> {
        let id = self.session.track_added(&entity)?;
        Ok(EntityEntry::new(self.session.clone(), id))
    }

    pub fn insert_many<I>(&self, entities: I) -> Result<Vec<EntityEntry<E>>, UowError>
    where
        I: IntoIterator<Item = E>,
    {
        entities.into_iter().map(|e| self.insert(e)).collect()
    }

    pub async fn insert_async(&self, entity: E, cancel: &CancellationToken) -> Result<EntityEntry<E>, UowError> {
        if cancel.is_cancelled() {
            return Err(UowError::Cancelled);
        }
        self.insert(entity)
    }

    pub async fn insert_many_async(
        &self,
        entities: Vec<E>,
        cancel: &CancellationToken,
    ) -> Result<Vec<EntityEntry<E>>, UowError> {
        if cancel.is_cancelled() {
            return Err(UowError::Cancelled);
        }
        self.insert_many(entities)
    }

    /// Stage an update of every persisted column, attaching the entity if needed
    pub fn update(&self, entity: &E) -> Result<(), UowError> {
        self.session.track_modified(entity)
    }

    pub fn update_many<'a, I>(&self, entities: I) -> Result<(), UowError>
    where
        I: IntoIterator<Item = &'a E>,
    {
        entities.into_iter().try_for_each(|e| self.update(e))
    }

    pub fn delete(&self, entity: &E) -> Result<(), UowError> {
        self.session.track_deleted(entity)
    }

    pub fn delete_many<'a, I>(&self, entities: I) -> Result<(), UowError>
    where
        I: IntoIterator<Item = &'a E>,
    {
        entities.into_iter().try_for_each(|e| self.delete(e))
    }

    /// Stage removal by key.
    ///
    /// Types with a key accessor are removed without a round trip; otherwise the entity is
    /// looked up first. A missing row is not an error.
    pub fn delete_by_key(&self, key: E::Key) -> Result<(), UowError> {
        if let Some(placeholder) = E::key_accessor() {
            return self.delete(&placeholder(key));
        }
        match self.find(&key)? {
            Some(entity) => self.delete(&entity),
            None => {
                log::debug!("delete_by_key: no {} with the given key", std::any::type_name::<E>());
                Ok(())
            }
        }
    }

    /// Force a tracking state
    pub fn change_entity_state(&self, entity: &E, state: EntityState) -> Result<(), UowError> {
        self.session.track_state(entity, state)
    }

    // ---- bulk statements --------------------------------------------------------------

    fn update_statement<C, X, I>(&self, predicate: Option<Condition>, assignments: I) -> Result<Statement, UowError>
    where
        C: Into<String>,
        X: Into<Expr>,
        I: IntoIterator<Item = (C, X)>,
    {
        let mut query = Query::update();
        query.table(Ident::new(self.session.table_name::<E>()));
        let mut assigned = 0;
        for (column, value) in assignments {
            let value: Expr = value.into();
            query.value(Ident::new(column.into()), value);
            assigned += 1;
        }
        if assigned == 0 {
            return Err(UowError::InvalidArgument(
                "execute_update needs at least one assignment".to_string(),
            ));
        }
        if let Some(condition) = predicate {
            query.cond_where(condition);
        }
        Ok(self.session.render(&query))
    }

    fn delete_statement(&self, predicate: Option<Condition>) -> Statement {
        let mut query = Query::delete();
        query.from_table(Ident::new(self.session.table_name::<E>()));
        if let Some(condition) = predicate {
            query.cond_where(condition);
        }
        self.session.render(&query)
    }

    /// Run a set-based `UPDATE` now. Tracked entities are not touched and global query
    /// filters do not apply. Returns the affected row count.
    pub fn execute_update<C, X, I>(&self, predicate: Option<Condition>, assignments: I) -> Result<u64, UowError>
    where
        C: Into<String>,
        X: Into<Expr>,
        I: IntoIterator<Item = (C, X)>,
    {
        let statement = self.update_statement(predicate, assignments)?;
        self.session.execute(&statement)
    }

    pub async fn execute_update_async<C, X, I>(
        &self,
        predicate: Option<Condition>,
        assignments: I,
        cancel: &CancellationToken,
    ) -> Result<u64, UowError>
    where
        C: Into<String>,
        X: Into<Expr>,
        I: IntoIterator<Item = (C, X)>,
    {
        let statement = self.update_statement(predicate, assignments)?;
        self.session.execute_async(&statement, cancel).await
    }

    /// Run a set-based `DELETE` now
    pub fn execute_delete(&self, predicate: Option<Condition>) -> Result<u64, UowError> {
        self.session.execute(&self.delete_statement(predicate))
    }

    pub async fn execute_delete_async(
        &self,
        predicate: Option<Condition>,
        cancel: &CancellationToken,
    ) -> Result<u64, UowError> {
        let statement = self.delete_statement(predicate);
        self.session.execute_async(&statement, cancel).await
    }
}

/// Object-safe repository seam for custom repositories.
///
/// Implementors provide [`EntityRepository::base`] and override whatever they need; every
/// other method delegates to the generic repository.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use uow::{Entity, EntityRepository, Repository};
///
/// #[derive(Debug, Clone, Serialize, Deserialize, Entity)]
/// #[table_name = "customers"]
/// struct Customer {
///     #[primary_key]
///     id: i64,
///     active: bool,
/// }
///
/// struct CustomerRepository {
///     base: Repository<Customer>,
/// }
///
/// impl EntityRepository<Customer> for CustomerRepository {
///     fn base(&self) -> &Repository<Customer> {
///         &self.base
///     }
/// }
/// ```
#[async_trait]
pub trait EntityRepository<E: Entity>: Send + Sync {
    fn base(&self) -> &Repository<E>;

    fn get_all_list(&self, options: QueryOptions<E>) -> Result<Vec<E>, UowError> {
        self.base().get_all_list(options)
    }

    fn get_paged_list(&self, options: QueryOptions<E>, page: Page) -> Result<PagedResult<E>, UowError> {
        self.base().get_paged_list(options, page)
    }

    fn get_first_or_default(&self, options: QueryOptions<E>) -> Result<Option<E>, UowError> {
        self.base().get_first_or_default(options)
    }

    fn find(&self, key: &E::Key) -> Result<Option<E>, UowError> {
        self.base().find(key)
    }

    fn count(&self, predicate: Option<Condition>) -> Result<usize, UowError> {
        self.base().count(predicate)
    }

    fn exists(&self, predicate: Option<Condition>) -> Result<bool, UowError> {
        self.base().exists(predicate)
    }

    fn insert(&self, entity: E) -> Result<EntityEntry<E>, UowError> {
        self.base().insert(entity)
    }

    fn update(&self, entity: &E) -> Result<(), UowError> {
        self.base().update(entity)
    }

    fn delete(&self, entity: &E) -> Result<(), UowError> {
        self.base().delete(entity)
    }

    fn delete_by_key(&self, key: E::Key) -> Result<(), UowError> {
        self.base().delete_by_key(key)
    }

    async fn get_all_async(&self, options: QueryOptions<E>, cancel: &CancellationToken) -> Result<Vec<E>, UowError> {
        self.base().get_all_async(options, cancel).await
    }

    async fn get_paged_list_async(
        &self,
        options: QueryOptions<E>,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<PagedResult<E>, UowError> {
        self.base().get_paged_list_async(options, page, cancel).await
    }

    async fn find_async(&self, key: &E::Key, cancel: &CancellationToken) -> Result<Option<E>, UowError> {
        self.base().find_async(key, cancel).await
    }

    async fn count_async(&self, predicate: Option<Condition>, cancel: &CancellationToken) -> Result<usize, UowError> {
        self.base().count_async(predicate, cancel).await
    }

    async fn insert_async(&self, entity: E, cancel: &CancellationToken) -> Result<EntityEntry<E>, UowError> {
        self.base().insert_async(entity, cancel).await
    }
}

impl<E: Entity> EntityRepository<E> for Repository<E> {
    fn base(&self) -> &Repository<E> {
        self
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;
    use crate::entity::PrimaryKey;
    use sea_query::ExprTrait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: i64,
        title: String,
        archived: bool,
    }

    impl Entity for Note {
        type Key = i64;
        const TABLE: &'static str = "notes";
        const COLUMNS: &'static [&'static str] = &["id", "title", "archived"];
        const PRIMARY_KEY: PrimaryKey = PrimaryKey {
            columns: &["id"],
            auto_increment: true,
        };

        fn key(&self) -> i64 {
            self.id
        }
    }

    fn repository() -> Repository<Note> {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .execute_batch(
                "CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL, archived BOOLEAN NOT NULL);
                 CREATE TABLE notes_archive (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL, archived BOOLEAN NOT NULL);
                 INSERT INTO notes (title, archived) VALUES ('one', 0), ('two', 1), ('three', 0);",
            )
            .unwrap();
        Repository::new(Session::new(backend))
    }

    fn archived() -> Condition {
        Condition::all().add(Expr::col(Ident::new("archived")).eq(true))
    }

    #[test]
    fn test_find_tracks_and_prefers_tracked_values() {
        let notes = repository();
        let mut one = notes.find(&1).unwrap().unwrap();
        assert_eq!(one.title, "one");
        assert_eq!(notes.entry(&1).unwrap().unwrap().state(), EntityState::Unchanged);

        one.title = "edited".to_string();
        notes.update(&one).unwrap();
        assert_eq!(notes.find(&1).unwrap().unwrap().title, "edited");
        assert!(notes.find(&99).unwrap().is_none());
    }

    #[test]
    fn test_aggregates_respect_predicate() {
        let notes = repository();
        assert_eq!(notes.count(None).unwrap(), 3);
        assert_eq!(notes.long_count(Some(archived())).unwrap(), 1);
        assert!(notes.exists(Some(archived())).unwrap());
        assert_eq!(notes.max::<i64>("id", None).unwrap(), Some(3));
        assert_eq!(notes.sum::<i64>("id", Some(archived())).unwrap(), Some(2));
        assert_eq!(notes.average("id", None).unwrap(), Some(2.0));

        let none = Condition::all().add(Expr::col(Ident::new("id")).gt(100));
        assert_eq!(notes.max::<i64>("id", Some(none)).unwrap(), None);
    }

    #[test]
    fn test_execute_update_and_delete_bypass_tracker() {
        let notes = repository();
        let tracked = notes.find(&2).unwrap().unwrap();

        let affected = notes
            .execute_update(Some(archived()), [("title", Expr::val("old"))])
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(notes.find(&2).unwrap().unwrap(), tracked);
        assert_eq!(notes.entry(&2).unwrap().unwrap().state(), EntityState::Unchanged);

        assert_eq!(notes.execute_delete(Some(archived())).unwrap(), 1);
        assert_eq!(notes.count(None).unwrap(), 2);
    }

    #[test]
    fn test_execute_update_needs_assignments() {
        let notes = repository();
        let none: [(&str, Expr); 0] = [];
        let err = notes.execute_update(None, none).unwrap_err();
        assert!(matches!(err, UowError::InvalidArgument(_)));
    }

    #[test]
    fn test_delete_by_key_without_accessor_loads_first() {
        let notes = repository();
        notes.delete_by_key(3).unwrap();
        let entries = notes.session().tracked_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, json!(3));
        assert_eq!(entries[0].state, EntityState::Deleted);

        notes.delete_by_key(42).unwrap();
        assert_eq!(notes.session().tracked_entries().len(), 1);
    }

    #[test]
    fn test_change_table_redirects_queries() {
        let notes = repository();
        notes.change_table("notes_archive");
        assert_eq!(notes.count(None).unwrap(), 0);
        notes
            .insert(Note {
                id: 0,
                title: "kept".into(),
                archived: true,
            })
            .unwrap();
        notes.session().save_changes().unwrap();
        assert_eq!(notes.count(None).unwrap(), 1);
    }

    #[test]
    fn test_from_sql_composes() {
        let notes = repository();
        let titles: Vec<String> = notes
            .from_sql("SELECT * FROM notes WHERE id > ?", vec![1.into()])
            .filter(Expr::col(Ident::new("archived")).eq(false))
            .to_list()
            .unwrap()
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert_eq!(titles, vec!["three".to_string()]);
    }

    #[test]
    fn test_local_skips_deleted() {
        let notes = repository();
        let one = notes.find(&1).unwrap().unwrap();
        let two = notes.find(&2).unwrap().unwrap();
        notes.delete(&two).unwrap();
        assert_eq!(notes.local().unwrap(), vec![one]);
    }
}
