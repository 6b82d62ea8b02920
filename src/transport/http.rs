//! HTTP transport: REST API plus MCP over Streamable HTTP.
//!
//! Routes:
//! - `POST /api/sql`: run a SELECT and return every row
//! - `GET /api/sql/suggestions`: starter questions
//! - `GET /health`: backend and connector state (never authenticated)
//! - the MCP endpoint (default `/mcp`)
//!
//! Bearer authentication, when configured, covers `/api` and the MCP endpoint.

use crate::auth::{AuthConfig, auth_middleware};
use crate::db::{ConnectorState, StatementExecutor};
use crate::error::{DbError, DbResult};
use crate::mcp::SqlService;
use crate::tools::{
    ListSuggestionsInput, ListSuggestionsOutput, SqlApiRequest, SqlApiResponse, SqlQueryHandler,
    list_suggestions,
};
use crate::transport::{Transport, wait_for_signal};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

/// Shared state for the REST handlers.
struct AppState<E> {
    handler: SqlQueryHandler<E>,
}

impl<E> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    backend: String,
    connector: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation: Option<u64>,
}

/// Build the full router: REST API, health check and MCP endpoint.
pub fn build_router<E: StatementExecutor>(
    handler: SqlQueryHandler<E>,
    auth: Arc<AuthConfig>,
    mcp_endpoint: &str,
) -> Router {
    let factory_handler = handler.clone();
    let mcp_service = StreamableHttpService::new(
        move || Ok(SqlService::new(factory_handler.clone())),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let state = AppState { handler };

    let api = Router::new()
        .route("/api/sql", post(api_sql::<E>))
        .route("/api/sql/suggestions", get(api_suggestions))
        .with_state(state.clone());

    // nest_service doesn't support the root path, use fallback_service instead
    let protected = if mcp_endpoint == "/" {
        api.fallback_service(mcp_service)
    } else {
        api.nest_service(mcp_endpoint, mcp_service)
    }
    .layer(middleware::from_fn_with_state(auth, auth_middleware));

    Router::new()
        .route("/health", get(health::<E>))
        .with_state(state)
        .merge(protected)
}

async fn api_sql<E: StatementExecutor>(
    State(state): State<AppState<E>>,
    payload: Result<Json<SqlApiRequest>, JsonRejection>,
) -> Result<Json<SqlApiResponse>, DbError> {
    let Json(request) = payload.map_err(|e| DbError::invalid_input(e.body_text()))?;
    if request.query.trim().is_empty() {
        return Err(DbError::invalid_input("Query must not be empty"));
    }

    let span = info_span!("api_sql", request_id = %Uuid::new_v4());
    async move {
        match state.handler.api_query(request).await {
            Ok(response) => {
                info!(row_count = response.row_count, "SQL request served");
                Ok(Json(response))
            }
            Err(err) => {
                match err.reject_reason() {
                    Some(reason) => warn!(reason = %reason, "SQL request rejected"),
                    None => error!(error = %err, "SQL execution error"),
                }
                Err(err)
            }
        }
    }
    .instrument(span)
    .await
}

async fn api_suggestions(Query(input): Query<ListSuggestionsInput>) -> Json<ListSuggestionsOutput> {
    Json(list_suggestions(input.category))
}

async fn health<E: StatementExecutor>(State(state): State<AppState<E>>) -> Json<HealthResponse> {
    let executor = state.handler.executor().executor();
    let (connector, generation) = match executor.status().await {
        ConnectorState::Ready { generation } => ("ready", Some(generation)),
        ConnectorState::Connecting => ("connecting", None),
        ConnectorState::Resetting => ("resetting", None),
        ConnectorState::Uninitialized => ("uninitialized", None),
    };
    Json(HealthResponse {
        status: "ok",
        backend: executor.backend().to_string(),
        connector,
        generation,
    })
}

/// HTTP transport implementation.
pub struct HttpTransport<E> {
    handler: SqlQueryHandler<E>,
    auth: Arc<AuthConfig>,
    /// Host to bind to
    host: String,
    /// Port to bind to
    port: u16,
    /// MCP endpoint path
    endpoint: String,
}

impl<E: StatementExecutor> HttpTransport<E> {
    pub fn new(
        handler: SqlQueryHandler<E>,
        auth: Arc<AuthConfig>,
        host: impl Into<String>,
        port: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            handler,
            auth,
            host: host.into(),
            port,
            endpoint: endpoint.into(),
        }
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the MCP endpoint path.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl<E: StatementExecutor> Transport for HttpTransport<E> {
    async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        info!("Starting HTTP server on {}", bind_addr);

        let app = build_router(self.handler.clone(), Arc::clone(&self.auth), &self.endpoint);

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            DbError::connection(
                format!("Failed to bind to {}: {}", bind_addr, e),
                "Check that the port is available",
            )
        })?;

        info!(
            endpoint = %self.endpoint,
            auth = self.auth.is_enabled(),
            "REST API and MCP endpoint ready"
        );

        // SSE connections may keep the server alive indefinitely, so force
        // exit after a timeout once a shutdown signal is received
        const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();

        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        return Err(DbError::internal(format!("HTTP server error: {}", e)));
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for connections to close (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => {}
        }

        self.handler.executor().executor().shutdown().await;

        Ok(())
    }
}
