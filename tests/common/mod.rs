//! Shared fixtures for the integration tests
#![allow(dead_code)]

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uow::backend::{Backend, Dialect, SqliteBackend, Statement};
use uow::{Entity, Row, Session, UowError};

pub const SCHEMA: &str = "
    CREATE TABLE widgets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        price REAL NOT NULL
    );
    CREATE TABLE gadgets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        price REAL NOT NULL
    );
    CREATE TABLE customers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        active BOOLEAN NOT NULL
    );
    CREATE TABLE orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        customer_id INTEGER NOT NULL,
        total REAL NOT NULL
    );
    CREATE TABLE codes (
        id INTEGER PRIMARY KEY,
        label TEXT NOT NULL
    );
";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Entity)]
#[table_name = "widgets"]
#[key_stub]
pub struct Widget {
    #[primary_key]
    #[auto_increment]
    pub id: i64,
    pub name: String,
    pub price: f64,
}

impl Widget {
    pub fn named(name: impl Into<String>, price: f64) -> Self {
        Self {
            id: 0,
            name: name.into(),
            price,
        }
    }
}

/// Same columns as [`Widget`] but without a key accessor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Entity)]
#[table_name = "gadgets"]
pub struct Gadget {
    #[primary_key]
    #[auto_increment]
    pub id: i64,
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Entity)]
#[table_name = "customers"]
pub struct Customer {
    #[primary_key]
    #[auto_increment]
    pub id: i64,
    pub name: String,
    pub active: bool,
    #[navigation]
    #[serde(default)]
    pub orders: Vec<Order>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Entity)]
#[table_name = "orders"]
pub struct Order {
    #[primary_key]
    #[auto_increment]
    pub id: i64,
    pub customer_id: i64,
    pub total: f64,
}

/// Caller-assigned key, where 0 is a valid identity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Entity)]
#[table_name = "codes"]
pub struct Code {
    #[primary_key]
    pub id: i64,
    pub label: String,
}

impl Code {
    pub fn new(id: i64, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }
}

/// Projection of a widget row
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WidgetName {
    pub name: String,
}

/// SQLite backend that records every statement and counts `close` calls
#[derive(Clone)]
pub struct RecordingBackend {
    inner: Arc<SqliteBackend>,
    statements: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        let inner = SqliteBackend::open_in_memory().unwrap();
        inner.execute_batch(SCHEMA).unwrap();
        Self {
            inner: Arc::new(inner),
            statements: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    pub fn clear(&self) {
        self.statements.lock().clear();
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn record(&self, statement: &Statement) {
        self.statements.lock().push(statement.sql.clone());
    }
}

impl Backend for RecordingBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&self, statement: &Statement) -> Result<u64, UowError> {
        self.record(statement);
        self.inner.execute(statement)
    }

    fn query(&self, statement: &Statement) -> Result<Vec<Row>, UowError> {
        self.record(statement);
        self.inner.query(statement)
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close();
    }
}

/// Fresh in-memory database with the test schema
pub fn session() -> Session {
    let backend = SqliteBackend::open_in_memory().unwrap();
    backend.execute_batch(SCHEMA).unwrap();
    Session::new(backend)
}

/// Session over a recording backend, plus a handle to inspect it
pub fn recording_session() -> (Session, RecordingBackend) {
    let backend = RecordingBackend::new();
    (Session::new(backend.clone()), backend)
}

pub fn seed_customers(session: &Session) {
    session
        .execute_sql(
            "INSERT INTO customers (name, active) VALUES ('ada', 1), ('bob', 0), ('cy', 1)",
            Vec::new(),
        )
        .unwrap();
    session
        .execute_sql(
            "INSERT INTO orders (customer_id, total) VALUES (1, 10.0), (1, 15.5), (3, 7.25)",
            Vec::new(),
        )
        .unwrap();
}
