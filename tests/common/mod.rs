//! Shared helpers for integration tests.
//!
//! [`MockDriver`] is a scripted [`WarehouseDriver`]: each execute pops the
//! next scripted outcome, and sessions of one generation can be made to fail
//! as expired. Statements on a session that was closed underneath them fail
//! the way a closed Postgres pool does.

#![allow(dead_code)]

use serde_json::json;
use sql_chat_gateway::db::{Connector, QueryExecutor, WarehouseDriver};
use sql_chat_gateway::error::{DbError, DbResult};
use sql_chat_gateway::gate::QueryGate;
use sql_chat_gateway::models::{BackendKind, Row};
use sql_chat_gateway::tools::SqlQueryHandler;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const STALE_SESSION_ERROR: &str =
    "Statement request failed with HTTP 400: Invalid SessionHandle";

pub const CLOSED_POOL_ERROR: &str = "Connection pool is closed";

pub struct MockDriver {
    kind: BackendKind,
    default_rows: Vec<Row>,
    connect_failures: Mutex<VecDeque<String>>,
    results: Mutex<VecDeque<Result<Vec<Row>, String>>>,
    stale_session: Option<(u64, Duration)>,
    connect_delay: Option<Duration>,
    slow_statement: Option<(String, Duration)>,
    closed_sessions: Mutex<HashSet<u64>>,
    statements: Mutex<Vec<String>>,
    pub connects: AtomicUsize,
    pub executes: AtomicUsize,
    pub session_closes: AtomicUsize,
    pub client_closes: AtomicUsize,
}

impl MockDriver {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            default_rows: product_rows(3),
            connect_failures: Mutex::new(VecDeque::new()),
            results: Mutex::new(VecDeque::new()),
            stale_session: None,
            connect_delay: None,
            slow_statement: None,
            closed_sessions: Mutex::new(HashSet::new()),
            statements: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            executes: AtomicUsize::new(0),
            session_closes: AtomicUsize::new(0),
            client_closes: AtomicUsize::new(0),
        }
    }

    /// Rows returned when no outcome is scripted.
    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.default_rows = rows;
        self
    }

    /// Queue an execution failure.
    pub fn then_fail(self, message: &str) -> Self {
        self.results
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    /// Queue a successful execution.
    pub fn then_return(self, rows: Vec<Row>) -> Self {
        self.results.lock().unwrap().push_back(Ok(rows));
        self
    }

    /// Queue a connect failure.
    pub fn fail_connect(self, message: &str) -> Self {
        self.connect_failures
            .lock()
            .unwrap()
            .push_back(message.to_string());
        self
    }

    /// Every statement on session `id` fails as expired after `delay`.
    pub fn expire_session(mut self, id: u64, delay: Duration) -> Self {
        self.stale_session = Some((id, delay));
        self
    }

    /// Every connect takes `delay` before completing.
    pub fn slow_connect(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Statements containing `marker` wait `delay` before running.
    pub fn slow_statement(mut self, marker: &str, delay: Duration) -> Self {
        self.slow_statement = Some((marker.to_string(), delay));
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn execute_count(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

impl WarehouseDriver for MockDriver {
    type Client = u64;
    type Session = u64;

    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn connect(&self) -> DbResult<u64> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.connect_failures.lock().unwrap().pop_front();
        if let Some(message) = failure {
            return Err(DbError::connection(message, "Check the warehouse"));
        }
        Ok(self.connects.fetch_add(1, Ordering::SeqCst) as u64 + 1)
    }

    async fn open_session(&self, client: &u64) -> DbResult<u64> {
        Ok(*client)
    }

    async fn execute(&self, session: &u64, sql: &str) -> DbResult<Vec<Row>> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        self.statements.lock().unwrap().push(sql.to_string());

        if let Some((marker, delay)) = &self.slow_statement {
            if sql.contains(marker.as_str()) {
                tokio::time::sleep(*delay).await;
            }
        }
        if self.closed_sessions.lock().unwrap().contains(session) {
            return Err(DbError::connection(CLOSED_POOL_ERROR, "Check the warehouse"));
        }

        if let Some((id, delay)) = self.stale_session {
            if *session == id {
                tokio::time::sleep(delay).await;
                return Err(DbError::execution(STALE_SESSION_ERROR, None));
            }
        }

        let scripted = self.results.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(rows)) => Ok(rows),
            Some(Err(message)) => Err(DbError::execution(message, None)),
            None => Ok(self.default_rows.clone()),
        }
    }

    async fn close_session(&self, session: &u64) -> DbResult<()> {
        self.closed_sessions.lock().unwrap().insert(*session);
        self.session_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close_client(&self, _client: &u64) -> DbResult<()> {
        self.client_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Rows shaped like the product table, in column order.
pub fn product_rows(count: usize) -> Vec<Row> {
    (1..=count)
        .map(|i| {
            let mut row = Row::new();
            row.insert("id".to_string(), json!(i));
            row.insert("title".to_string(), json!(format!("Product {}", i)));
            row.insert("rating".to_string(), json!(4.5));
            row
        })
        .collect()
}

/// Handler over a connector with the backend's default gate.
pub fn handler_for(driver: MockDriver) -> SqlQueryHandler<Connector<MockDriver>> {
    let gate = QueryGate::for_backend(driver.kind());
    let executor = QueryExecutor::new(gate, Arc::new(Connector::new(driver)));
    SqlQueryHandler::new(executor)
}
