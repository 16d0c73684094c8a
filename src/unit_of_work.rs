//! Unit of work: the per-scope coordinator over one session.
//!
//! A [`UnitOfWork`] hands out one repository per entity type, owns the transaction entry
//! points and flushes staged changes with [`UnitOfWork::save_changes`]. Save failures do not
//! propagate: they are recorded in [`SaveChangesResult`] and the save reports zero entries.

use crate::backend::Statement;
use crate::entity::Entity;
use crate::error::{error_messages, UowError};
use crate::query::EntityQuery;
use crate::repository::{EntityRepository, Repository};
use crate::session::graph::GraphNode;
use crate::session::transaction::DbTransaction;
use crate::session::Session;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome record of the saves made through one unit of work
#[derive(Debug, Default)]
pub struct SaveChangesResult {
    messages: Vec<String>,
    error: Option<UowError>,
}

impl SaveChangesResult {
    /// Result that starts with one message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
            error: None,
        }
    }

    pub fn add_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Failure of the most recent failed save
    pub fn last_error(&self) -> Option<&UowError> {
        self.error.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// The recorded failure and its causes, one per line
    pub fn error_messages(&self) -> Option<String> {
        self.error.as_ref().map(|e| error_messages(e))
    }

    pub(crate) fn record_failure(&mut self, error: UowError) {
        self.error = Some(error);
    }
}

/// Coordinates repositories, transactions and saving over one session.
///
/// Not meant to be shared between concurrent callers; every mutating method takes
/// `&mut self`. Wrap it in `tokio::sync::Mutex` (as the registry does) to share it.
pub struct UnitOfWork {
    session: Session,
    owns_session: bool,
    repositories: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    last_save_changes_result: SaveChangesResult,
    disposed: bool,
}

impl UnitOfWork {
    /// Unit of work that owns `session` and disposes it with itself
    pub fn new(session: Session) -> Self {
        Self::with_ownership(session, true)
    }

    /// Unit of work over a session someone else disposes
    pub(crate) fn borrowing(session: Session) -> Self {
        Self::with_ownership(session, false)
    }

    fn with_ownership(session: Session, owns_session: bool) -> Self {
        log::debug!(
            "unit of work over session {} created (owns session: {owns_session})",
            session.id()
        );
        Self {
            session,
            owns_session,
            repositories: HashMap::new(),
            last_save_changes_result: SaveChangesResult::default(),
            disposed: false,
        }
    }

    /// Open a backend from a URL and own the resulting session
    pub fn connect(url: &str) -> Result<Self, UowError> {
        Ok(Self::new(Session::connect(url)?))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn ensure_active(&self) -> Result<(), UowError> {
        if self.disposed {
            Err(UowError::Disposed)
        } else {
            Ok(())
        }
    }

    /// The repository for `E`; the same instance on every call
    pub fn repository<E: Entity>(&mut self) -> Result<Arc<Repository<E>>, UowError> {
        self.ensure_active()?;
        let session = &self.session;
        let cached = self
            .repositories
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Arc::new(Repository::<E>::new(session.clone())));
        Arc::clone(cached)
            .downcast::<Repository<E>>()
            .map_err(|_| UowError::Other(format!("repository cache mismatch for {}", std::any::type_name::<E>())))
    }

    /// The custom repository registered for `E` when `use_custom` is set and one exists,
    /// otherwise the generic repository
    pub fn get_repository<E: Entity>(&mut self, use_custom: bool) -> Result<Arc<dyn EntityRepository<E>>, UowError> {
        self.ensure_active()?;
        if use_custom {
            if let Some(custom) = self.session.custom_repository::<E>() {
                return Ok(custom);
            }
        }
        let generic: Arc<dyn EntityRepository<E>> = self.repository::<E>()?;
        Ok(generic)
    }

    pub fn begin_transaction(&self, use_if_exists: bool) -> Result<DbTransaction, UowError> {
        self.ensure_active()?;
        self.session.begin_transaction(use_if_exists)
    }

    pub async fn begin_transaction_async(
        &self,
        use_if_exists: bool,
        cancel: &CancellationToken,
    ) -> Result<DbTransaction, UowError> {
        self.ensure_active()?;
        self.session.begin_transaction_async(use_if_exists, cancel).await
    }

    fn capture(&mut self, outcome: Result<usize, UowError>) -> usize {
        match outcome {
            Ok(written) => written,
            Err(e) => {
                log::warn!("save_changes failed on session {}: {e}", self.session.id());
                self.last_save_changes_result.record_failure(e);
                0
            }
        }
    }

    /// Write all staged changes; returns the number of entries written.
    ///
    /// Failures are recorded in [`UnitOfWork::last_save_changes_result`] and reported as 0.
    pub fn save_changes(&mut self) -> usize {
        let outcome = match self.ensure_active() {
            Ok(()) => self.session.save_changes(),
            Err(e) => Err(e),
        };
        self.capture(outcome)
    }

    pub async fn save_changes_async(&mut self, cancel: &CancellationToken) -> usize {
        let outcome = match self.ensure_active() {
            Ok(()) => self.session.save_changes_async(cancel).await,
            Err(e) => Err(e),
        };
        self.capture(outcome)
    }

    /// Save each of `peers` in order, then this unit of work, and sum the counts.
    ///
    /// Each save is its own transaction; a failed peer does not undo the others.
    pub async fn save_changes_with(&mut self, peers: &mut [&mut UnitOfWork], cancel: &CancellationToken) -> usize {
        let mut total = 0;
        for peer in peers.iter_mut() {
            total += peer.save_changes_async(cancel).await;
        }
        total + self.save_changes_async(cancel).await
    }

    pub fn last_save_changes_result(&self) -> &SaveChangesResult {
        &self.last_save_changes_result
    }

    pub fn last_save_changes_result_mut(&mut self) -> &mut SaveChangesResult {
        &mut self.last_save_changes_result
    }

    pub fn set_auto_detect_changes(&self, enabled: bool) {
        self.session.set_auto_detect_changes(enabled);
    }

    /// Run raw SQL; returns the affected row count
    pub fn execute_sql_command(&self, sql: &str, values: Vec<sea_query::Value>) -> Result<u64, UowError> {
        self.ensure_active()?;
        self.session.execute_sql(sql, values)
    }

    pub async fn execute_sql_command_async(
        &self,
        sql: &str,
        values: Vec<sea_query::Value>,
        cancel: &CancellationToken,
    ) -> Result<u64, UowError> {
        self.ensure_active()?;
        self.session.execute_sql_async(sql, values, cancel).await
    }

    /// Composable query over a raw SQL source
    pub fn from_sql_raw<E: Entity>(&self, sql: &str, values: Vec<sea_query::Value>) -> Result<EntityQuery<E>, UowError> {
        self.ensure_active()?;
        Ok(EntityQuery::from_raw(self.session.clone(), Statement::new(sql, values)))
    }

    /// See [`Session::track_graph`]
    pub fn track_graph<E, F>(&self, root: &E, callback: F) -> Result<(), UowError>
    where
        E: Entity,
        F: FnMut(&mut GraphNode),
    {
        self.ensure_active()?;
        self.session.track_graph(root, callback)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Release the unit of work. The session is disposed too when this unit of work owns
    /// it. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.repositories.clear();
        if self.owns_session {
            self.session.dispose();
        }
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("session", &self.session)
            .field("owns_session", &self.owns_session)
            .field("repositories", &self.repositories.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;
    use crate::entity::PrimaryKey;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Color {
        id: i64,
        name: String,
    }

    impl Entity for Color {
        type Key = i64;
        const TABLE: &'static str = "colors";
        const COLUMNS: &'static [&'static str] = &["id", "name"];
        const PRIMARY_KEY: PrimaryKey = PrimaryKey {
            columns: &["id"],
            auto_increment: true,
        };

        fn key(&self) -> i64 {
            self.id
        }
    }

    fn unit_of_work() -> UnitOfWork {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .execute_batch("CREATE TABLE colors (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE)")
            .unwrap();
        UnitOfWork::new(Session::new(backend))
    }

    fn color(name: &str) -> Color {
        Color {
            id: 0,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_save_result_with_initial_message() {
        let mut result = SaveChangesResult::new("import started");
        result.add_message("3 rows staged");
        assert_eq!(result.messages(), &["import started", "3 rows staged"]);
        assert!(result.is_ok());
        assert!(SaveChangesResult::default().messages().is_empty());
    }

    #[test]
    fn test_repository_is_cached_per_type() {
        let mut uow = unit_of_work();
        let first = uow.repository::<Color>().unwrap();
        let second = uow.repository::<Color>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_save_failure_is_captured() {
        let mut uow = unit_of_work();
        let colors = uow.repository::<Color>().unwrap();
        colors.insert(color("red")).unwrap();
        colors.insert(color("red")).unwrap();

        assert_eq!(uow.save_changes(), 0);
        let result = uow.last_save_changes_result();
        assert!(!result.is_ok());
        assert!(result.messages().is_empty());
        assert!(result.error_messages().unwrap().contains("UNIQUE"));
    }

    #[test]
    fn test_messages_accumulate() {
        let mut uow = unit_of_work();
        uow.last_save_changes_result_mut().add_message("imported batch 1");
        uow.last_save_changes_result_mut().add_message("imported batch 2");
        assert_eq!(uow.last_save_changes_result().messages().len(), 2);
        assert!(uow.last_save_changes_result().is_ok());
    }

    #[test]
    fn test_disposed_unit_of_work_rejects_work() {
        let mut uow = unit_of_work();
        uow.dispose();
        uow.dispose();
        assert!(uow.session().is_disposed());
        assert!(matches!(uow.repository::<Color>(), Err(UowError::Disposed)));
        assert_eq!(uow.save_changes(), 0);
        assert!(matches!(
            uow.last_save_changes_result().last_error(),
            Some(UowError::Disposed)
        ));
    }

    #[tokio::test]
    async fn test_save_changes_with_sums_peers() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .execute_batch("CREATE TABLE colors (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE)")
            .unwrap();
        let session = Session::new(backend);
        let mut main = UnitOfWork::borrowing(session.clone());
        let mut peer = UnitOfWork::borrowing(Session::connect("sqlite::memory:").unwrap());
        peer.execute_sql_command(
            "CREATE TABLE colors (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE)",
            Vec::new(),
        )
        .unwrap();

        main.repository::<Color>().unwrap().insert(color("red")).unwrap();
        let peer_colors = peer.repository::<Color>().unwrap();
        peer_colors.insert(color("blue")).unwrap();
        peer_colors.insert(color("green")).unwrap();

        let token = CancellationToken::new();
        assert_eq!(main.save_changes_with(&mut [&mut peer], &token).await, 3);
        assert!(main.last_save_changes_result().is_ok());
    }
}
