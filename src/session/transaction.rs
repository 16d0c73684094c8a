//! Explicit transactions on a session.
//!
//! The outermost transaction issues `BEGIN`/`COMMIT`/`ROLLBACK`; transactions started while
//! another is open are savepoints named `sp_{depth}`. A [`DbTransaction`] that is dropped
//! without being committed rolls back.

use super::SessionInner;
use crate::backend::{Backend, Statement};
use crate::error::UowError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

pub(crate) struct TransactionInner {
    session: Weak<SessionInner>,
    backend: Arc<dyn Backend>,
    depth: u32,
    closed: AtomicBool,
}

impl TransactionInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn begin_statement(depth: u32) -> Statement {
        if depth == 1 {
            Statement::raw("BEGIN")
        } else {
            Statement::raw(format!("SAVEPOINT sp_{depth}"))
        }
    }

    fn commit_statement(&self) -> Statement {
        if self.depth == 1 {
            Statement::raw("COMMIT")
        } else {
            Statement::raw(format!("RELEASE SAVEPOINT sp_{}", self.depth))
        }
    }

    fn rollback_statements(&self) -> Vec<Statement> {
        if self.depth == 1 {
            vec![Statement::raw("ROLLBACK")]
        } else {
            vec![
                Statement::raw(format!("ROLLBACK TO SAVEPOINT sp_{}", self.depth)),
                Statement::raw(format!("RELEASE SAVEPOINT sp_{}", self.depth)),
            ]
        }
    }

    /// Close this transaction and every transaction nested inside it
    fn finish(&self) {
        self.mark_closed();
        if let Some(session) = self.session.upgrade() {
            session.pop_transactions(self.depth);
        }
    }

    fn rollback_now(&self) -> Result<(), UowError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::rollback_transaction_span(self.depth).entered();

        let mut result = Ok(());
        for statement in self.rollback_statements() {
            if let Err(e) = self.backend.execute(&statement) {
                result = Err(e);
                break;
            }
        }
        self.finish();
        result
    }
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        if !self.is_closed() {
            log::debug!("transaction at depth {} dropped while open, rolling back", self.depth);
            if let Err(e) = self.rollback_now() {
                log::warn!("rollback of dropped transaction failed: {e}");
            }
        }
    }
}

/// Handle to an open transaction.
///
/// Handles are cheap to clone; `begin_transaction(true)` hands out another handle to the
/// transaction already in progress. Committing or rolling back through any handle closes it
/// for all of them.
///
/// # Examples
///
/// ```
/// use uow::{backend::SqliteBackend, Session};
///
/// # fn main() -> Result<(), uow::UowError> {
/// let session = Session::new(SqliteBackend::open_in_memory()?);
/// let tx = session.begin_transaction(false)?;
/// assert_eq!(tx.depth(), 1);
///
/// let joined = session.begin_transaction(true)?;
/// assert!(joined.same_transaction(&tx));
///
/// tx.commit()?;
/// assert!(joined.is_closed());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DbTransaction {
    inner: Arc<TransactionInner>,
}

impl DbTransaction {
    pub(crate) fn from_inner(inner: Arc<TransactionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn start(session: &Arc<SessionInner>, depth: u32) -> Result<Self, UowError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span(depth).entered();

        let backend = Arc::clone(&session.backend);
        backend.execute(&TransactionInner::begin_statement(depth))?;
        Ok(Self::from_inner(Arc::new(TransactionInner {
            session: Arc::downgrade(session),
            backend,
            depth,
            closed: AtomicBool::new(false),
        })))
    }

    pub(crate) async fn start_async(
        session: &Arc<SessionInner>,
        depth: u32,
        cancel: &CancellationToken,
    ) -> Result<Self, UowError> {
        let backend = Arc::clone(&session.backend);
        backend
            .execute_async(&TransactionInner::begin_statement(depth), cancel)
            .await?;
        Ok(Self::from_inner(Arc::new(TransactionInner {
            session: Arc::downgrade(session),
            backend,
            depth,
            closed: AtomicBool::new(false),
        })))
    }

    pub(crate) fn inner(&self) -> &Arc<TransactionInner> {
        &self.inner
    }

    /// Nesting depth: 1 for the outermost transaction
    pub fn depth(&self) -> u32 {
        self.inner.depth
    }

    /// Check if the transaction is closed
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Whether both handles refer to the same transaction
    pub fn same_transaction(&self, other: &DbTransaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Commit the transaction (or release its savepoint).
    ///
    /// # Errors
    ///
    /// Returns `UowError::TransactionClosed` if the transaction has already been committed or
    /// rolled back, or the backend error if `COMMIT` fails (the transaction is then rolled
    /// back).
    pub fn commit(&self) -> Result<(), UowError> {
        if self.inner.is_closed() {
            return Err(UowError::TransactionClosed);
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_transaction_span(self.inner.depth).entered();

        match self.inner.backend.execute(&self.inner.commit_statement()) {
            Ok(_) => {
                self.inner.finish();
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.inner.rollback_now() {
                    log::warn!("rollback after failed commit also failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    /// Roll back the transaction (or to its savepoint).
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction has already been committed or rolled back.
    pub fn rollback(&self) -> Result<(), UowError> {
        if self.inner.is_closed() {
            return Err(UowError::TransactionClosed);
        }
        self.inner.rollback_now()
    }

    pub async fn commit_async(&self, cancel: &CancellationToken) -> Result<(), UowError> {
        if self.inner.is_closed() {
            return Err(UowError::TransactionClosed);
        }
        match self
            .inner
            .backend
            .execute_async(&self.inner.commit_statement(), cancel)
            .await
        {
            Ok(_) => {
                self.inner.finish();
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.inner.rollback_now() {
                    log::warn!("rollback after failed commit also failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    pub async fn rollback_async(&self, cancel: &CancellationToken) -> Result<(), UowError> {
        if self.inner.is_closed() {
            return Err(UowError::TransactionClosed);
        }
        if cancel.is_cancelled() {
            return Err(UowError::Cancelled);
        }
        self.inner.rollback_now()
    }
}

impl std::fmt::Debug for DbTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbTransaction")
            .field("depth", &self.inner.depth)
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}
