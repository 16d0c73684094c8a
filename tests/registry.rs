//! Resolving units of work and custom repositories through the registry

mod common;

use common::{Widget, SCHEMA};
use std::sync::Arc;
use uow::backend::SqliteBackend;
use uow::sea_query::{Condition, Expr, ExprTrait};
use uow::value::Ident;
use uow::{
    ContextConfig, ContextRegistration, DbContext, EntityRepository, QueryOptions, Registry, Repository,
    ServiceLifetime, Session, UnitOfWorkConfig, UowError,
};

struct Inventory;
impl DbContext for Inventory {
    const NAME: &'static str = "inventory";
}

fn inventory_session() -> Result<Session, UowError> {
    let backend = SqliteBackend::open_in_memory()?;
    backend.execute_batch(SCHEMA)?;
    Ok(Session::new(backend))
}

/// Widgets repository that hides anything priced at zero
struct PricedWidgets {
    base: Repository<Widget>,
}

impl EntityRepository<Widget> for PricedWidgets {
    fn base(&self) -> &Repository<Widget> {
        &self.base
    }

    fn get_all_list(&self, options: QueryOptions<Widget>) -> Result<Vec<Widget>, UowError> {
        self.base
            .get_all_list(options.filter(Expr::col(Ident::new("price")).gt(0.0)))
    }

    fn count(&self, predicate: Option<Condition>) -> Result<usize, UowError> {
        let priced = Condition::all().add(Expr::col(Ident::new("price")).gt(0.0));
        let predicate = match predicate {
            Some(p) => priced.add(p),
            None => priced,
        };
        self.base.count(Some(predicate))
    }
}

#[tokio::test]
async fn test_scoped_unit_of_work_is_shared_within_scope() {
    let registry = Registry::builder()
        .add_unit_of_work(ContextRegistration::of::<Inventory, _>(
            ServiceLifetime::Scoped,
            inventory_session,
        ))
        .build();

    let scope = registry.create_scope();
    {
        let uow = scope.unit_of_work_for::<Inventory>().unwrap();
        let mut uow = uow.lock().await;
        uow.repository::<Widget>()
            .unwrap()
            .insert(Widget::named("bolt", 0.5))
            .unwrap();
    }
    let uow = scope.unit_of_work().unwrap();
    let mut uow = uow.lock().await;
    assert!(uow.session().has_changes());
    assert_eq!(uow.save_changes(), 1);

    let other = registry.create_scope().unit_of_work().unwrap();
    assert!(!other.lock().await.session().has_changes());
}

#[tokio::test]
async fn test_custom_repository_from_registry() {
    let registry = Registry::builder()
        .add_unit_of_work(ContextRegistration::of::<Inventory, _>(
            ServiceLifetime::Transient,
            inventory_session,
        ))
        .add_custom_repository::<Widget, _, _>(|base| PricedWidgets { base })
        .build();

    let uow = registry.create_scope().unit_of_work().unwrap();
    let mut uow = uow.lock().await;
    uow.execute_sql_command(
        "INSERT INTO widgets (name, price) VALUES ('free', 0.0), ('paid', 3.0)",
        Vec::new(),
    )
    .unwrap();

    let custom = uow.get_repository::<Widget>(true).unwrap();
    assert!(Arc::ptr_eq(&custom, &uow.get_repository::<Widget>(true).unwrap()));
    assert_eq!(custom.count(None).unwrap(), 1);
    assert_eq!(custom.get_all_list(QueryOptions::new()).unwrap()[0].name, "paid");
    assert!(custom.find(&1).unwrap().is_some());

    let generic = uow.get_repository::<Widget>(false).unwrap();
    assert_eq!(generic.count(None).unwrap(), 2);
}

#[tokio::test]
async fn test_registry_from_config() {
    let config = UnitOfWorkConfig {
        contexts: vec![
            ContextConfig {
                name: "inventory".into(),
                url: "sqlite::memory:".into(),
                lifetime: ServiceLifetime::Singleton,
                auto_detect_changes: false,
                factory: true,
            },
            ContextConfig {
                name: "audit".into(),
                url: "sqlite::memory:".into(),
                lifetime: ServiceLifetime::Scoped,
                auto_detect_changes: true,
                factory: false,
            },
        ],
    };
    let registry = Registry::from_config(&config);
    assert_eq!(registry.default_context(), Some("inventory"));

    let first = registry.create_scope().unit_of_work().unwrap();
    let second = registry.create_scope().unit_of_work_for::<Inventory>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(!first.lock().await.session().auto_detect_changes());

    let audit = registry.create_scope().unit_of_work_named("audit").unwrap();
    assert!(audit.lock().await.session().auto_detect_changes());

    let factory = registry.create_scope().unit_of_work_factory_named("inventory").unwrap();
    assert!(!factory.create_unit_of_work().session().is_disposed());
    assert!(registry.create_scope().unit_of_work_factory_named("audit").is_err());
}
