//! Databricks SQL warehouse driver.
//!
//! Talks to the SQL Statement Execution REST API (`/api/2.0/sql/statements`).
//! The client is an authenticated HTTP client bound to the workspace URL; a
//! session is that client bound to one warehouse, which is started when it is
//! stopped. Statements run with inline JSON results: the driver waits up to
//! `wait_timeout` server-side, then polls until the statement finishes and
//! follows every result chunk link. Statements abandoned before completion
//! are cancelled.
//!
//! Non-success HTTP responses become execution errors whose message carries
//! the status code, so an expired token or session (HTTP 400) is picked up by
//! the connector's stale-session heuristic.
//!
//! The REST API is stateless: there is no server-side session to close and
//! the client holds no pooled resources worth releasing early. Closing a
//! session or client is therefore a no-op, and a connector reset amounts to a
//! fresh warehouse lookup (which restarts a stopped warehouse).

use crate::db::driver::WarehouseDriver;
use crate::db::types::{TypeCategory, categorize_type, coerce_text_value};
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Server-side wait before the API returns a pending statement (5..=50 seconds).
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Connection settings for the warehouse backend.
#[derive(Clone)]
pub struct DatabricksConfig {
    /// Workspace host, with or without scheme.
    pub server_hostname: String,
    /// Warehouse HTTP path, e.g. `/sql/1.0/warehouses/abc123`.
    pub http_path: String,
    /// Personal access token (sensitive - not logged).
    pub access_token: String,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub query_timeout: Duration,
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
}

impl DatabricksConfig {
    pub fn new(
        server_hostname: impl Into<String>,
        http_path: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            server_hostname: server_hostname.into(),
            http_path: http_path.into(),
            access_token: access_token.into(),
            catalog: None,
            schema: None,
            query_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    /// Warehouse id: the last segment of the HTTP path.
    pub fn warehouse_id(&self) -> DbResult<String> {
        self.http_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
            .map(String::from)
            .ok_or_else(|| {
                DbError::configuration(format!(
                    "Cannot derive a warehouse id from DATABRICKS_HTTP_PATH '{}'",
                    self.http_path
                ))
            })
    }

    /// Workspace base URL; `https://` is assumed when no scheme is given.
    pub fn base_url(&self) -> DbResult<Url> {
        let host = self.server_hostname.trim().trim_end_matches('/');
        let raw = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}/", host)
        } else {
            format!("https://{}/", host)
        };
        Url::parse(&raw).map_err(|e| {
            DbError::configuration(format!("Invalid DATABRICKS_SERVER_HOSTNAME: {}", e))
        })
    }
}

impl fmt::Debug for DatabricksConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabricksConfig")
            .field("server_hostname", &self.server_hostname)
            .field("http_path", &self.http_path)
            .field("access_token", &"<redacted>")
            .field("catalog", &self.catalog)
            .field("schema", &self.schema)
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

/// Authenticated HTTP client bound to a workspace.
pub struct WorkspaceClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl WorkspaceClient {
    fn endpoint(&self, path: &str) -> DbResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| DbError::internal(format!("Invalid warehouse endpoint '{}': {}", path, e)))
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str, context: &str) -> DbResult<T> {
        let response = self
            .http
            .get(self.endpoint(path)?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(check_status(response, context).await?.json().await?)
    }

    async fn post<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
        context: &str,
    ) -> DbResult<T> {
        let response = self
            .http
            .post(self.endpoint(path)?)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Ok(check_status(response, context).await?.json().await?)
    }
}

/// A workspace client bound to one running warehouse.
pub struct WarehouseSession {
    client: Arc<WorkspaceClient>,
    warehouse_id: String,
}

impl WarehouseSession {
    pub fn warehouse_id(&self) -> &str {
        &self.warehouse_id
    }
}

#[derive(Debug, Clone)]
pub struct DatabricksDriver {
    config: DatabricksConfig,
}

impl DatabricksDriver {
    pub fn new(config: DatabricksConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DatabricksConfig {
        &self.config
    }

    async fn submit(&self, session: &WarehouseSession, sql: &str) -> DbResult<StatementResponse> {
        let request = ExecuteStatementRequest {
            statement: sql,
            warehouse_id: &session.warehouse_id,
            catalog: self.config.catalog.as_deref(),
            schema: self.config.schema.as_deref(),
            wait_timeout: format!("{}s", DEFAULT_WAIT_TIMEOUT_SECS),
            on_wait_timeout: "CONTINUE",
            disposition: "INLINE",
            format: "JSON_ARRAY",
        };
        session
            .client
            .post("api/2.0/sql/statements", &request, "Statement submission")
            .await
    }

    /// Poll until the statement leaves the pending/running states.
    async fn wait_for_completion(
        &self,
        session: &WarehouseSession,
        mut response: StatementResponse,
    ) -> DbResult<StatementResponse> {
        let deadline = Instant::now() + self.config.query_timeout;
        while response.status.state.is_active() {
            if Instant::now() >= deadline {
                self.cancel(session, &response.statement_id).await;
                return Err(DbError::timeout(
                    "warehouse statement",
                    self.config.query_timeout.as_secs(),
                ));
            }
            tokio::time::sleep(self.config.poll_interval).await;

            let path = format!("api/2.0/sql/statements/{}", response.statement_id);
            response = match session.client.get(&path, "Statement status").await {
                Ok(next) => next,
                Err(err) => {
                    self.cancel(session, &response.statement_id).await;
                    return Err(err);
                }
            };
        }
        Ok(response)
    }

    /// Best-effort cancellation of an unfinished statement.
    async fn cancel(&self, session: &WarehouseSession, statement_id: &str) {
        let path = format!("api/2.0/sql/statements/{}/cancel", statement_id);
        let result: DbResult<JsonValue> = session
            .client
            .post(&path, &serde_json::json!({}), "Statement cancellation")
            .await;
        if let Err(err) = result {
            debug!(statement_id, error = %err, "Ignoring error while cancelling statement");
        }
    }
}

impl WarehouseDriver for DatabricksDriver {
    type Client = Arc<WorkspaceClient>;
    type Session = WarehouseSession;

    fn kind(&self) -> BackendKind {
        BackendKind::Warehouse
    }

    async fn connect(&self) -> DbResult<Arc<WorkspaceClient>> {
        let base_url = self.config.base_url()?;
        let http = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECS) + self.config.connect_timeout)
            .user_agent(concat!("sql-chat-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                DbError::connection(
                    format!("Failed to build HTTP client: {}", e),
                    "Check TLS configuration",
                )
            })?;

        debug!(host = %base_url, "Workspace client ready");
        Ok(Arc::new(WorkspaceClient {
            http,
            base_url,
            token: self.config.access_token.clone(),
        }))
    }

    async fn open_session(&self, client: &Arc<WorkspaceClient>) -> DbResult<WarehouseSession> {
        let warehouse_id = self.config.warehouse_id()?;
        let path = format!("api/2.0/sql/warehouses/{}", warehouse_id);
        let info: WarehouseInfo = client.get(&path, "Warehouse lookup").await?;

        if info.needs_start() {
            warn!(warehouse_id = %warehouse_id, state = ?info.state, "Warehouse stopped, starting it");
            let _: JsonValue = client
                .post(
                    &format!("{}/start", path),
                    &serde_json::json!({}),
                    "Warehouse start",
                )
                .await?;
        }

        info!(
            warehouse_id = %warehouse_id,
            name = ?info.name,
            state = ?info.state,
            "Warehouse session opened"
        );
        Ok(WarehouseSession {
            client: Arc::clone(client),
            warehouse_id,
        })
    }

    async fn execute(&self, session: &WarehouseSession, sql: &str) -> DbResult<Vec<Row>> {
        let submitted = self.submit(session, sql).await?;
        let statement_id = submitted.statement_id.clone();
        let finished = self.wait_for_completion(session, submitted).await?;

        match finished.status.state {
            StatementState::Succeeded => {}
            StatementState::Failed => return Err(finished.status.into_error()),
            other => {
                return Err(DbError::execution(
                    format!("Statement {} ended in state {:?}", statement_id, other),
                    None,
                ));
            }
        }

        let columns = finished
            .manifest
            .map(|m| m.schema.columns)
            .unwrap_or_default();
        let categories: Vec<TypeCategory> = columns
            .iter()
            .map(|c| categorize_type(c.type_name.as_deref().unwrap_or("string")))
            .collect();

        let mut rows = Vec::new();
        let mut chunk = finished.result;
        while let Some(current) = chunk {
            rows.extend(rows_from_chunk(&columns, &categories, current.data_array));
            chunk = match current.next_chunk_internal_link {
                Some(link) => Some(session.client.get(&link, "Result chunk fetch").await?),
                None => None,
            };
        }

        debug!(statement_id = %statement_id, rows = rows.len(), "Warehouse statement finished");
        Ok(rows)
    }

    /// No-op: statements are stateless REST calls.
    async fn close_session(&self, session: &WarehouseSession) -> DbResult<()> {
        debug!(warehouse_id = %session.warehouse_id, "Releasing warehouse session");
        Ok(())
    }

    /// No-op: the HTTP connection pool is dropped with the last handle.
    async fn close_client(&self, _client: &Arc<WorkspaceClient>) -> DbResult<()> {
        Ok(())
    }
}

/// Turn non-success responses into execution errors carrying the status code.
async fn check_status(response: reqwest::Response, context: &str) -> DbResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(api_error(context, status.as_u16(), &body))
}

fn api_error(context: &str, status: u16, body: &str) -> DbError {
    let detail = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.trim().to_string());
    DbError::execution(
        format!("{} failed with HTTP {}: {}", context, status, detail),
        None,
    )
}

/// Convert one inline result chunk to rows keyed by column name.
fn rows_from_chunk(
    columns: &[ColumnInfo],
    categories: &[TypeCategory],
    data: Option<Vec<Vec<JsonValue>>>,
) -> Vec<Row> {
    data.unwrap_or_default()
        .into_iter()
        .map(|values| {
            columns
                .iter()
                .zip(categories)
                .zip(values)
                .map(|((column, category), value)| {
                    let value = match value {
                        JsonValue::String(text) => coerce_text_value(&text, *category),
                        other => other,
                    };
                    (column.name.clone(), value)
                })
                .collect()
        })
        .collect()
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct ExecuteStatementRequest<'a> {
    statement: &'a str,
    warehouse_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    catalog: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    wait_timeout: String,
    on_wait_timeout: &'static str,
    disposition: &'static str,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    statement_id: String,
    status: StatementStatus,
    #[serde(default)]
    manifest: Option<ResultManifest>,
    #[serde(default)]
    result: Option<ResultChunk>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: StatementState,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

impl StatementStatus {
    fn into_error(self) -> DbError {
        match self.error {
            Some(ApiErrorBody {
                error_code,
                message,
            }) => DbError::execution(
                message.unwrap_or_else(|| "Statement failed".to_string()),
                error_code,
            ),
            None => DbError::execution("Statement failed", None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum StatementState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Closed,
}

impl StatementState {
    fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultManifest {
    schema: ResultSchema,
}

#[derive(Debug, Deserialize)]
struct ResultSchema {
    #[serde(default)]
    columns: Vec<ColumnInfo>,
}

#[derive(Debug, Deserialize)]
struct ColumnInfo {
    name: String,
    #[serde(default)]
    type_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultChunk {
    #[serde(default)]
    data_array: Option<Vec<Vec<JsonValue>>>,
    #[serde(default)]
    next_chunk_internal_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WarehouseInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

impl WarehouseInfo {
    fn needs_start(&self) -> bool {
        matches!(self.state.as_deref(), Some("STOPPED") | Some("STOPPING"))
    }
}
