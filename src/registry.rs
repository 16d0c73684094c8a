//! Composition root for units of work.
//!
//! Applications register their database contexts once, build a [`Registry`], and resolve
//! units of work through a [`Scope`] (typically one per request). Each registration carries a
//! [`ServiceLifetime`] that decides how long a resolved unit of work lives.

use crate::config::{ContextConfig, UnitOfWorkConfig};
use crate::entity::Entity;
use crate::error::UowError;
use crate::factory::UnitOfWorkFactory;
use crate::repository::{EntityRepository, Repository};
use crate::session::Session;
use crate::unit_of_work::UnitOfWork;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// A unit of work resolved from a registry
pub type SharedUnitOfWork = Arc<tokio::sync::Mutex<UnitOfWork>>;

type SessionFactory = Arc<dyn Fn() -> Result<Session, UowError> + Send + Sync>;
type SessionSetup = Arc<dyn Fn(&Session) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceLifetime {
    /// One instance for the registry
    Singleton,
    /// One instance per scope
    #[default]
    Scoped,
    /// A new instance on every resolution
    Transient,
}

/// Marker for a typed database context, resolved by its registration name
pub trait DbContext: Send + Sync + 'static {
    const NAME: &'static str;
}

/// How to build the session behind one context
#[derive(Clone)]
pub struct ContextRegistration {
    name: String,
    lifetime: ServiceLifetime,
    create: SessionFactory,
    auto_detect_changes: bool,
}

impl ContextRegistration {
    pub fn new<F>(name: impl Into<String>, lifetime: ServiceLifetime, create: F) -> Self
    where
        F: Fn() -> Result<Session, UowError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            lifetime,
            create: Arc::new(create),
            auto_detect_changes: true,
        }
    }

    /// Registration named after a typed context
    pub fn of<C, F>(lifetime: ServiceLifetime, create: F) -> Self
    where
        C: DbContext,
        F: Fn() -> Result<Session, UowError> + Send + Sync + 'static,
    {
        Self::new(C::NAME, lifetime, create)
    }

    /// Registration that connects to the configured URL
    pub fn from_config(config: &ContextConfig) -> Self {
        let url = config.url.clone();
        Self::new(config.name.clone(), config.lifetime, move || Session::connect(&url))
            .with_auto_detect_changes(config.auto_detect_changes)
    }

    pub fn with_auto_detect_changes(mut self, enabled: bool) -> Self {
        self.auto_detect_changes = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifetime(&self) -> ServiceLifetime {
        self.lifetime
    }
}

impl std::fmt::Debug for ContextRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRegistration")
            .field("name", &self.name)
            .field("lifetime", &self.lifetime)
            .field("auto_detect_changes", &self.auto_detect_changes)
            .finish()
    }
}

fn upsert(registrations: &mut Vec<ContextRegistration>, registration: ContextRegistration) {
    match registrations.iter_mut().find(|r| r.name == registration.name) {
        Some(existing) => *existing = registration,
        None => registrations.push(registration),
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    contexts: Vec<ContextRegistration>,
    default_context: Option<String>,
    factories: Vec<ContextRegistration>,
    session_setup: Vec<SessionSetup>,
}

impl RegistryBuilder {
    /// Register a context and make it the default; a later registration wins
    pub fn add_unit_of_work(mut self, registration: ContextRegistration) -> Self {
        self.default_context = Some(registration.name.clone());
        upsert(&mut self.contexts, registration);
        self
    }

    /// Register a context unless one with the same name exists; it becomes the default only
    /// if there is none yet
    pub fn try_add_unit_of_work(mut self, registration: ContextRegistration) -> Self {
        if self.contexts.iter().any(|r| r.name == registration.name) {
            return self;
        }
        if self.default_context.is_none() {
            self.default_context = Some(registration.name.clone());
        }
        self.contexts.push(registration);
        self
    }

    /// Register several contexts for named or typed resolution; the default is unchanged
    pub fn add_unit_of_works<I>(mut self, registrations: I) -> Self
    where
        I: IntoIterator<Item = ContextRegistration>,
    {
        for registration in registrations {
            upsert(&mut self.contexts, registration);
        }
        self
    }

    /// Register a [`UnitOfWorkFactory`] for a context
    pub fn add_unit_of_work_factory(mut self, registration: ContextRegistration) -> Self {
        upsert(&mut self.factories, registration);
        self
    }

    /// Custom repository for `E`, resolved by `UnitOfWork::get_repository(true)` on every
    /// session this registry creates
    pub fn add_custom_repository<E, R, F>(mut self, create: F) -> Self
    where
        E: Entity,
        R: EntityRepository<E> + 'static,
        F: Fn(Repository<E>) -> R + Send + Sync + 'static,
    {
        let create = Arc::new(create);
        self.session_setup.push(Arc::new(move |session: &Session| {
            let create = Arc::clone(&create);
            session.register_repository::<E, R, _>(move |base| create(base));
        }));
        self
    }

    pub fn build(self) -> Registry {
        let index = |registrations: Vec<ContextRegistration>| {
            registrations
                .into_iter()
                .map(|r| (r.name.clone(), r))
                .collect::<HashMap<_, _>>()
        };
        Registry {
            inner: Arc::new(RegistryInner {
                contexts: index(self.contexts),
                default_context: self.default_context,
                factories: index(self.factories),
                session_setup: self.session_setup,
                singletons: Mutex::new(HashMap::new()),
                singleton_factories: Mutex::new(HashMap::new()),
            }),
        }
    }
}

struct RegistryInner {
    contexts: HashMap<String, ContextRegistration>,
    default_context: Option<String>,
    factories: HashMap<String, ContextRegistration>,
    session_setup: Vec<SessionSetup>,
    singletons: Mutex<HashMap<String, SharedUnitOfWork>>,
    singleton_factories: Mutex<HashMap<String, Arc<UnitOfWorkFactory>>>,
}

impl RegistryInner {
    fn create_session(&self, registration: &ContextRegistration) -> Result<Session, UowError> {
        let session = (registration.create)()?;
        session.set_auto_detect_changes(registration.auto_detect_changes);
        for setup in &self.session_setup {
            setup(&session);
        }
        Ok(session)
    }

    fn create_unit_of_work(&self, registration: &ContextRegistration) -> Result<SharedUnitOfWork, UowError> {
        let session = self.create_session(registration)?;
        log::debug!("resolved unit of work for context {}", registration.name);
        Ok(Arc::new(tokio::sync::Mutex::new(UnitOfWork::new(session))))
    }

    fn create_factory(&self, registration: &ContextRegistration) -> Result<Arc<UnitOfWorkFactory>, UowError> {
        Ok(Arc::new(UnitOfWorkFactory::from_session(
            self.create_session(registration)?,
        )))
    }
}

/// Built registrations plus the singleton instances
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Register every configured context; the first one becomes the default
    pub fn from_config(config: &UnitOfWorkConfig) -> Self {
        let mut builder = Self::builder();
        for context in &config.contexts {
            let registration = ContextRegistration::from_config(context);
            if context.factory {
                builder = builder.add_unit_of_work_factory(registration.clone());
            }
            builder = builder.try_add_unit_of_work(registration);
        }
        builder.build()
    }

    pub fn create_scope(&self) -> Scope {
        Scope {
            registry: self.clone(),
            scoped: Mutex::new(HashMap::new()),
            scoped_factories: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_context(&self) -> Option<&str> {
        self.inner.default_context.as_deref()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("contexts", &self.inner.contexts.keys().collect::<Vec<_>>())
            .field("default_context", &self.inner.default_context)
            .field("factories", &self.inner.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn resolve<T, F>(
    lifetime: ServiceLifetime,
    name: &str,
    singletons: &Mutex<HashMap<String, T>>,
    scoped: &Mutex<HashMap<String, T>>,
    create: F,
) -> Result<T, UowError>
where
    T: Clone,
    F: FnOnce() -> Result<T, UowError>,
{
    let cache = match lifetime {
        ServiceLifetime::Transient => return create(),
        ServiceLifetime::Singleton => singletons,
        ServiceLifetime::Scoped => scoped,
    };
    if let Some(existing) = cache.lock().get(name) {
        return Ok(existing.clone());
    }
    let created = create()?;
    Ok(cache
        .lock()
        .entry(name.to_string())
        .or_insert(created)
        .clone())
}

/// Resolution scope; scoped instances live as long as the scope
pub struct Scope {
    registry: Registry,
    scoped: Mutex<HashMap<String, SharedUnitOfWork>>,
    scoped_factories: Mutex<HashMap<String, Arc<UnitOfWorkFactory>>>,
}

impl Scope {
    /// The default context's unit of work
    pub fn unit_of_work(&self) -> Result<SharedUnitOfWork, UowError> {
        let name = self
            .registry
            .inner
            .default_context
            .as_deref()
            .ok_or_else(|| UowError::InvalidOperation("no default unit of work is registered".to_string()))?;
        self.unit_of_work_named(name)
    }

    pub fn unit_of_work_for<C: DbContext>(&self) -> Result<SharedUnitOfWork, UowError> {
        self.unit_of_work_named(C::NAME)
    }

    pub fn unit_of_work_named(&self, name: &str) -> Result<SharedUnitOfWork, UowError> {
        let inner = &self.registry.inner;
        let registration = inner
            .contexts
            .get(name)
            .ok_or_else(|| UowError::InvalidOperation(format!("no unit of work registered for context {name}")))?;
        resolve(registration.lifetime, name, &inner.singletons, &self.scoped, || {
            inner.create_unit_of_work(registration)
        })
    }

    pub fn unit_of_work_factory_for<C: DbContext>(&self) -> Result<Arc<UnitOfWorkFactory>, UowError> {
        self.unit_of_work_factory_named(C::NAME)
    }

    pub fn unit_of_work_factory_named(&self, name: &str) -> Result<Arc<UnitOfWorkFactory>, UowError> {
        let inner = &self.registry.inner;
        let registration = inner.factories.get(name).ok_or_else(|| {
            UowError::InvalidOperation(format!("no unit of work factory registered for context {name}"))
        })?;
        resolve(
            registration.lifetime,
            name,
            &inner.singleton_factories,
            &self.scoped_factories,
            || inner.create_factory(registration),
        )
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("scoped", &self.scoped.lock().len())
            .finish()
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;

    struct Catalog;
    impl DbContext for Catalog {
        const NAME: &'static str = "catalog";
    }

    struct Audit;
    impl DbContext for Audit {
        const NAME: &'static str = "audit";
    }

    fn memory() -> Result<Session, UowError> {
        Ok(Session::new(SqliteBackend::open_in_memory()?))
    }

    #[test]
    fn test_lifetimes() {
        let registry = Registry::builder()
            .add_unit_of_works([
                ContextRegistration::new("single", ServiceLifetime::Singleton, memory),
                ContextRegistration::new("scoped", ServiceLifetime::Scoped, memory),
                ContextRegistration::new("transient", ServiceLifetime::Transient, memory),
            ])
            .build();
        let first = registry.create_scope();
        let second = registry.create_scope();

        let a = first.unit_of_work_named("single").unwrap();
        let b = second.unit_of_work_named("single").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let a = first.unit_of_work_named("scoped").unwrap();
        let b = first.unit_of_work_named("scoped").unwrap();
        let c = second.unit_of_work_named("scoped").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let a = first.unit_of_work_named("transient").unwrap();
        let b = first.unit_of_work_named("transient").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_last_default_registration_wins() {
        let registry = Registry::builder()
            .add_unit_of_work(ContextRegistration::of::<Catalog, _>(ServiceLifetime::Scoped, memory))
            .add_unit_of_work(ContextRegistration::of::<Audit, _>(ServiceLifetime::Scoped, memory))
            .try_add_unit_of_work(ContextRegistration::new("late", ServiceLifetime::Scoped, memory))
            .build();
        assert_eq!(registry.default_context(), Some("audit"));

        let scope = registry.create_scope();
        let default = scope.unit_of_work().unwrap();
        let audit = scope.unit_of_work_for::<Audit>().unwrap();
        assert!(Arc::ptr_eq(&default, &audit));
        assert!(scope.unit_of_work_for::<Catalog>().is_ok());
        assert!(scope.unit_of_work_named("late").is_ok());
    }

    #[test]
    fn test_multi_registration_has_no_default() {
        let registry = Registry::builder()
            .add_unit_of_works([ContextRegistration::of::<Catalog, _>(ServiceLifetime::Scoped, memory)])
            .build();
        let scope = registry.create_scope();
        assert!(matches!(scope.unit_of_work(), Err(UowError::InvalidOperation(_))));
        assert!(scope.unit_of_work_for::<Catalog>().is_ok());
        assert!(matches!(
            scope.unit_of_work_named("missing"),
            Err(UowError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_session_factory_errors_propagate() {
        let registry = Registry::builder()
            .add_unit_of_work(ContextRegistration::new("broken", ServiceLifetime::Scoped, || {
                Session::connect("mysql://nowhere")
            }))
            .build();
        let err = registry.create_scope().unit_of_work().unwrap_err();
        assert!(matches!(err, UowError::InvalidArgument(_)));
    }

    #[test]
    fn test_factory_registration() {
        let registry = Registry::builder()
            .add_unit_of_work_factory(ContextRegistration::of::<Catalog, _>(ServiceLifetime::Singleton, memory))
            .build();
        let factory = registry.create_scope().unit_of_work_factory_for::<Catalog>().unwrap();
        let again = registry.create_scope().unit_of_work_factory_for::<Catalog>().unwrap();
        assert!(Arc::ptr_eq(&factory, &again));

        let mut uow = factory.create_unit_of_work();
        uow.dispose();
        assert!(!factory.session().is_disposed());
    }

    #[tokio::test]
    async fn test_auto_detect_setting_is_applied() {
        let registry = Registry::builder()
            .add_unit_of_work(
                ContextRegistration::new("manual", ServiceLifetime::Scoped, memory).with_auto_detect_changes(false),
            )
            .build();
        let scope = registry.create_scope();
        let uow = scope.unit_of_work().unwrap();
        assert!(!uow.lock().await.session().auto_detect_changes());
    }
}
