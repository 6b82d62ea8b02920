//! Configuration handling for the SQL chat gateway.
//!
//! This module provides configuration management via CLI arguments and environment variables.

use crate::db::{DatabricksConfig, PostgresConfig};
use crate::gate::{QueryGate, SANDBOX_TABLES, Sandbox, StrictDialect, TablePolicy};
use crate::models::BackendKind;
use clap::{Args, Parser, ValueEnum};
use std::time::Duration;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MCP_ENDPOINT: &str = "/mcp";
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Postgres connection pool options.
#[derive(Debug, Clone, Default, Args)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10)
    #[arg(long = "pool-max-connections", env = "POSTGRES_MAX_CONNECTIONS")]
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    #[arg(long = "pool-min-connections", env = "POSTGRES_MIN_CONNECTIONS")]
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    #[arg(long = "pool-idle-timeout", env = "POSTGRES_IDLE_TIMEOUT")]
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    #[arg(long = "pool-acquire-timeout", env = "POSTGRES_ACQUIRE_TIMEOUT")]
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    #[arg(long = "pool-test-before-acquire", env = "POSTGRES_TEST_BEFORE_ACQUIRE")]
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value.
    pub fn max_connections_or_default(&self) -> u32 {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == Some(0) {
            return Err("max_connections must be greater than 0".to_string());
        }
        if let Some(min) = self.min_connections {
            if min == 0 {
                return Err("min_connections must be greater than 0".to_string());
            }
            let max = self.max_connections_or_default();
            if min > max {
                return Err(format!(
                    "min_connections ({}) cannot exceed max_connections ({})",
                    min, max
                ));
            }
        }
        Ok(())
    }
}

/// Transport mode for the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportMode {
    /// MCP over standard input/output (for CLI integration)
    Stdio,
    /// REST API plus MCP over Streamable HTTP
    #[default]
    Http,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Validated settings for the selected backend.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Postgres(PostgresConfig),
    Warehouse(DatabricksConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Postgres(_) => BackendKind::Postgres,
            Self::Warehouse(_) => BackendKind::Warehouse,
        }
    }
}

/// Configuration for the SQL chat gateway.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sql-chat-gateway",
    about = "Read-only SQL gateway for chat assistants - validates LLM-authored queries and runs them against Postgres or a Databricks SQL warehouse",
    version,
    author
)]
pub struct Config {
    /// Backend to query (postgres or warehouse)
    #[arg(
        short,
        long,
        value_enum,
        default_value = "postgres",
        env = "SQL_GATEWAY_BACKEND"
    )]
    pub backend: BackendKind,

    /// Postgres connection URL (required for the postgres backend)
    #[arg(long, value_name = "URL", env = "POSTGRES_URL", hide_env_values = true)]
    pub postgres_url: Option<String>,

    #[command(flatten)]
    pub pool: PoolOptions,

    /// Databricks workspace host, e.g. dbc-xxxxxxxx-xxxx.cloud.databricks.com
    #[arg(long, env = "DATABRICKS_SERVER_HOSTNAME")]
    pub databricks_server_hostname: Option<String>,

    /// Warehouse HTTP path, e.g. /sql/1.0/warehouses/xxxxxxxxxxxxxxxx
    #[arg(long, env = "DATABRICKS_HTTP_PATH")]
    pub databricks_http_path: Option<String>,

    /// Databricks personal access token
    #[arg(long, env = "DATABRICKS_ACCESS_TOKEN", hide_env_values = true)]
    pub databricks_access_token: Option<String>,

    /// Default catalog for warehouse statements
    #[arg(long, env = "DATABRICKS_CATALOG")]
    pub databricks_catalog: Option<String>,

    /// Default schema for warehouse statements
    #[arg(long, env = "DATABRICKS_SCHEMA")]
    pub databricks_schema: Option<String>,

    /// Parse statements and reject multi-statement input, non-queries and
    /// relations outside the sandbox
    #[arg(long, env = "SQL_GATEWAY_STRICT")]
    pub strict_sql: bool,

    /// Tables statements may not reference (Postgres backend).
    /// Defaults to the application tables next to the product/review dataset.
    #[arg(
        long = "forbidden-table",
        value_name = "TABLE",
        env = "SQL_GATEWAY_FORBIDDEN_TABLES",
        value_delimiter = ','
    )]
    pub forbidden_tables: Vec<String>,

    /// Transport mode (http or stdio)
    #[arg(
        short,
        long,
        value_enum,
        default_value = "http",
        env = "SQL_GATEWAY_TRANSPORT"
    )]
    pub transport: TransportMode,

    /// HTTP host to bind to (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_HTTP_HOST,
        env = "SQL_GATEWAY_HTTP_HOST"
    )]
    pub http_host: String,

    /// HTTP port to bind to (only used with http transport)
    #[arg(
        long,
        default_value_t = DEFAULT_HTTP_PORT,
        env = "SQL_GATEWAY_HTTP_PORT"
    )]
    pub http_port: u16,

    /// MCP endpoint path (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_MCP_ENDPOINT,
        env = "SQL_GATEWAY_MCP_ENDPOINT"
    )]
    pub mcp_endpoint: String,

    /// Query timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "SQL_GATEWAY_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "SQL_GATEWAY_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Connect to the backend at startup instead of on the first query
    #[arg(long, env = "SQL_GATEWAY_EAGER_CONNECT")]
    pub eager_connect: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SQL_GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SQL_GATEWAY_JSON_LOGS")]
    pub json_logs: bool,

    /// Authentication tokens for HTTP transport.
    /// Can be specified multiple times or as comma-separated values.
    /// When set, requests to /api and the MCP endpoint must include a valid Bearer token.
    #[arg(
        long = "auth-token",
        value_name = "TOKEN",
        env = "SQL_GATEWAY_AUTH_TOKENS",
        value_delimiter = ',',
        hide_env_values = true
    )]
    pub auth_tokens: Vec<String>,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            backend: BackendKind::Postgres,
            postgres_url: None,
            pool: PoolOptions::default(),
            databricks_server_hostname: None,
            databricks_http_path: None,
            databricks_access_token: None,
            databricks_catalog: None,
            databricks_schema: None,
            strict_sql: false,
            forbidden_tables: Vec::new(),
            transport: TransportMode::Http,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            mcp_endpoint: DEFAULT_MCP_ENDPOINT.to_string(),
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            eager_connect: false,
            log_level: "info".to_string(),
            json_logs: false,
            auth_tokens: Vec::new(),
        }
    }

    /// Validate the selected backend's settings.
    ///
    /// Returns the names of every missing variable at once.
    pub fn backend_config(&self) -> Result<BackendConfig, String> {
        match self.backend {
            BackendKind::Postgres => {
                let url = required(&self.postgres_url, "POSTGRES_URL")
                    .map_err(|missing| format!("Missing required environment variable: {}", missing))?;
                self.pool.validate()?;
                Ok(BackendConfig::Postgres(PostgresConfig {
                    url,
                    pool_options: self.pool.clone(),
                    query_timeout: self.query_timeout_duration(),
                }))
            }
            BackendKind::Warehouse => {
                let host = required(&self.databricks_server_hostname, "DATABRICKS_SERVER_HOSTNAME");
                let path = required(&self.databricks_http_path, "DATABRICKS_HTTP_PATH");
                let token = required(&self.databricks_access_token, "DATABRICKS_ACCESS_TOKEN");

                let (host, path, token) = match (host, path, token) {
                    (Ok(host), Ok(path), Ok(token)) => (host, path, token),
                    (host, path, token) => {
                        let missing: Vec<&str> = [host.err(), path.err(), token.err()]
                            .into_iter()
                            .flatten()
                            .collect();
                        return Err(format!(
                            "Missing required environment variables: {}",
                            missing.join(", ")
                        ));
                    }
                };

                let mut config = DatabricksConfig::new(host, path, token);
                config.catalog = non_empty(&self.databricks_catalog);
                config.schema = non_empty(&self.databricks_schema);
                config.query_timeout = self.query_timeout_duration();
                config.connect_timeout = self.connect_timeout_duration();
                Ok(BackendConfig::Warehouse(config))
            }
        }
    }

    /// Table policy for the selected backend.
    ///
    /// Postgres is sandboxed to the product/review tables; the forbidden list
    /// can be overridden. The warehouse is unrestricted.
    pub fn table_policy(&self) -> TablePolicy {
        match self.backend {
            BackendKind::Postgres if !self.forbidden_tables.is_empty() => {
                TablePolicy::Sandboxed(Sandbox::new(SANDBOX_TABLES, &self.forbidden_tables))
            }
            kind => TablePolicy::for_backend(kind),
        }
    }

    /// Statement gate for the selected backend.
    pub fn query_gate(&self) -> QueryGate {
        let gate = QueryGate::new(self.table_policy());
        if !self.strict_sql {
            return gate;
        }
        let dialect = match self.backend {
            BackendKind::Postgres => StrictDialect::Postgres,
            BackendKind::Warehouse => StrictDialect::Generic,
        };
        gate.with_strict(dialect)
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    /// Get the connection timeout as a Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn required<'a>(value: &Option<String>, name: &'a str) -> Result<String, &'a str> {
    non_empty(value).ok_or(name)
}
