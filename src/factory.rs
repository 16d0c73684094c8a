//! Factory that keeps one long-lived session and mints units of work over it.

use crate::error::UowError;
use crate::session::Session;
use crate::unit_of_work::UnitOfWork;

/// Owns a session for longer than any single unit of work.
///
/// Units of work created here share the factory's session and leave it open when they are
/// disposed; the factory disposes it.
///
/// ```
/// use uow::{backend::SqliteBackend, Session, UnitOfWorkFactory};
///
/// # fn main() -> Result<(), uow::UowError> {
/// let factory = UnitOfWorkFactory::new(|| Ok(Session::new(SqliteBackend::open_in_memory()?)))?;
/// let mut first = factory.create_unit_of_work();
/// first.dispose();
/// assert!(!factory.session().is_disposed());
///
/// factory.dispose();
/// assert!(factory.session().is_disposed());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct UnitOfWorkFactory {
    session: Session,
}

impl UnitOfWorkFactory {
    /// Create the session once with `create`
    pub fn new<F>(create: F) -> Result<Self, UowError>
    where
        F: FnOnce() -> Result<Session, UowError>,
    {
        Ok(Self::from_session(create()?))
    }

    /// Take ownership of an existing session
    pub fn from_session(session: Session) -> Self {
        log::debug!("unit of work factory over session {}", session.id());
        Self { session }
    }

    pub fn connect(url: &str) -> Result<Self, UowError> {
        Ok(Self::from_session(Session::connect(url)?))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// A unit of work over the shared session. Disposing it leaves the session open.
    pub fn create_unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::borrowing(self.session.clone())
    }

    /// Dispose the session. Idempotent.
    pub fn dispose(&self) {
        self.session.dispose();
    }
}

impl Drop for UnitOfWorkFactory {
    fn drop(&mut self) {
        self.dispose();
    }
}
