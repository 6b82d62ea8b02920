//! Query execution.
//!
//! [`StatementExecutor`] is the single interface over both backends: the
//! Postgres and warehouse connectors implement it, and [`Backend`] dispatches
//! to whichever one is configured. [`QueryExecutor`] runs a request through
//! the gate and then the executor; the boundary layers only shape its output.

use crate::config::BackendConfig;
use crate::db::connector::{Connector, ConnectorState};
use crate::db::databricks::DatabricksDriver;
use crate::db::driver::WarehouseDriver;
use crate::db::postgres::PostgresDriver;
use crate::error::{DbError, DbResult};
use crate::gate::QueryGate;
use crate::impl_backend_dispatch;
use crate::models::{BackendKind, QueryOutcome, QueryRequest, QueryResult, Row};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Runs already-validated statements against one backend.
pub trait StatementExecutor: Send + Sync + 'static {
    fn backend(&self) -> BackendKind;

    /// Run a statement and return every row.
    fn run(&self, sql: &str) -> impl Future<Output = DbResult<Vec<Row>>> + Send;

    /// Connector lifecycle state.
    fn status(&self) -> impl Future<Output = ConnectorState> + Send;

    /// Release backend resources.
    fn shutdown(&self) -> impl Future<Output = ()> + Send;
}

impl<D: WarehouseDriver> StatementExecutor for Connector<D> {
    fn backend(&self) -> BackendKind {
        self.kind()
    }

    async fn run(&self, sql: &str) -> DbResult<Vec<Row>> {
        self.execute(sql).await
    }

    async fn status(&self) -> ConnectorState {
        self.state().await
    }

    async fn shutdown(&self) {
        self.close().await
    }
}

/// The configured backend.
#[derive(Debug)]
pub enum Backend {
    Postgres(Connector<PostgresDriver>),
    Warehouse(Connector<DatabricksDriver>),
}

impl Backend {
    pub fn postgres(driver: PostgresDriver) -> Self {
        Self::Postgres(Connector::new(driver))
    }

    pub fn warehouse(driver: DatabricksDriver) -> Self {
        Self::Warehouse(Connector::new(driver))
    }

    pub fn from_config(config: BackendConfig) -> Self {
        match config {
            BackendConfig::Postgres(pg) => Self::postgres(PostgresDriver::new(pg)),
            BackendConfig::Warehouse(wh) => Self::warehouse(DatabricksDriver::new(wh)),
        }
    }

    /// Connect eagerly so configuration problems surface at startup.
    pub async fn ensure_ready(&self) -> DbResult<()> {
        impl_backend_dispatch!(self, c => c.ensure_ready().await)
    }

    /// Drop the cached session; the next statement reconnects.
    pub async fn reset(&self) {
        impl_backend_dispatch!(self, c => c.reset().await)
    }
}

impl StatementExecutor for Backend {
    fn backend(&self) -> BackendKind {
        impl_backend_dispatch!(self, c => c.kind())
    }

    async fn run(&self, sql: &str) -> DbResult<Vec<Row>> {
        impl_backend_dispatch!(self, c => c.execute(sql).await)
    }

    async fn status(&self) -> ConnectorState {
        impl_backend_dispatch!(self, c => c.state().await)
    }

    async fn shutdown(&self) {
        impl_backend_dispatch!(self, c => c.close().await)
    }
}

/// Gate plus executor: the full path of one query request.
pub struct QueryExecutor<E> {
    gate: QueryGate,
    executor: Arc<E>,
}

impl<E> Clone for QueryExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<E: StatementExecutor> QueryExecutor<E> {
    pub fn new(gate: QueryGate, executor: Arc<E>) -> Self {
        Self { gate, executor }
    }

    pub fn gate(&self) -> &QueryGate {
        &self.gate
    }

    pub fn executor(&self) -> &Arc<E> {
        &self.executor
    }

    /// Validate and run a request.
    ///
    /// Rejected statements never reach the backend.
    pub async fn execute(&self, request: &QueryRequest) -> DbResult<QueryResult> {
        let statement = self
            .gate
            .validate(&request.raw_statement, request.requested_limit)?;

        let start = Instant::now();
        debug!(sql = %statement.text, backend = %self.executor.backend(), "Executing statement");
        let rows = self.executor.run(&statement.text).await?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            backend = %self.executor.backend(),
            rows = rows.len(),
            limit = statement.applied_limit,
            elapsed_ms,
            "Query completed"
        );
        Ok(QueryResult::new(statement, rows, elapsed_ms))
    }

    /// Validate and run a request, folding every failure into the outcome.
    pub async fn run(&self, request: &QueryRequest) -> QueryOutcome {
        match self.execute(request).await {
            Ok(result) => result.into(),
            Err(DbError::Rejected { reason, message }) => QueryOutcome::Rejected { reason, message },
            Err(err) => QueryOutcome::ExecutionFailed {
                message: err.client_message(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RejectReason;
    use std::sync::Mutex;

    /// Records statements and returns one fixed row.
    #[derive(Default)]
    struct RecordingExecutor {
        seen: Mutex<Vec<String>>,
        fail_with: Option<String>,
    }

    impl StatementExecutor for RecordingExecutor {
        fn backend(&self) -> BackendKind {
            BackendKind::Postgres
        }

        async fn run(&self, sql: &str) -> DbResult<Vec<Row>> {
            self.seen.lock().unwrap().push(sql.to_string());
            if let Some(message) = &self.fail_with {
                return Err(DbError::execution(message.clone(), None));
            }
            let mut row = Row::new();
            row.insert("title".to_string(), "Desk Lamp".into());
            Ok(vec![row])
        }

        async fn status(&self) -> ConnectorState {
            ConnectorState::Uninitialized
        }

        async fn shutdown(&self) {}
    }

    fn executor(inner: RecordingExecutor) -> QueryExecutor<RecordingExecutor> {
        QueryExecutor::new(QueryGate::for_backend(BackendKind::Postgres), Arc::new(inner))
    }

    #[tokio::test]
    async fn test_runs_validated_statement() {
        let qe = executor(RecordingExecutor::default());
        let outcome = qe.run(&QueryRequest::new("select title from product")).await;

        assert!(outcome.is_success());
        assert_eq!(
            *qe.executor().seen.lock().unwrap(),
            vec!["select title from product LIMIT 100".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rejected_statement_never_executes() {
        let qe = executor(RecordingExecutor::default());
        let outcome = qe.run(&QueryRequest::new("select * from \"User\"")).await;

        assert_eq!(outcome.reject_reason(), Some(RejectReason::ForbiddenTable));
        assert!(qe.executor().seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execution_failure_is_prefixed() {
        let qe = executor(RecordingExecutor {
            fail_with: Some("column \"nope\" does not exist".to_string()),
            ..Default::default()
        });
        match qe.run(&QueryRequest::new("select nope from product")).await {
            QueryOutcome::ExecutionFailed { message } => {
                assert_eq!(
                    message,
                    "SQL execution failed: column \"nope\" does not exist"
                );
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_result_carries_statement_and_count() {
        let qe = executor(RecordingExecutor::default());
        let result = qe
            .execute(&QueryRequest::new("select title from review").with_limit(7))
            .await
            .unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.statement.applied_limit, 7);
        assert_eq!(result.columns(), vec!["title".to_string()]);
    }
}
