//! SQL chat gateway - Main entry point.
//!
//! Serves the read-only SQL tool to chat assistants over MCP, plus a REST
//! API, backed by Postgres or a Databricks SQL warehouse.

use clap::Parser;
use sql_chat_gateway::auth::AuthConfig;
use sql_chat_gateway::config::{Config, TransportMode};
use sql_chat_gateway::db::{Backend, QueryExecutor};
use sql_chat_gateway::tools::SqlQueryHandler;
use sql_chat_gateway::transport::{HttpTransport, StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so stdout stays free for the stdio transport.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    let backend_config = match config.backend_config() {
        Ok(backend_config) => backend_config,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            eprintln!();
            eprintln!("Usage: sql-chat-gateway --backend postgres --postgres-url <url>");
            eprintln!("       sql-chat-gateway --backend warehouse \\");
            eprintln!("           --databricks-server-hostname <host> \\");
            eprintln!("           --databricks-http-path <path> \\");
            eprintln!("           --databricks-access-token <token>");
            eprintln!();
            eprintln!("Every flag can also be set through its environment variable:");
            eprintln!("  SQL_GATEWAY_BACKEND=postgres POSTGRES_URL=postgres://app@localhost/shop");
            eprintln!("  SQL_GATEWAY_BACKEND=warehouse DATABRICKS_SERVER_HOSTNAME=dbc-xxxx.cloud.databricks.com \\");
            eprintln!("      DATABRICKS_HTTP_PATH=/sql/1.0/warehouses/xxxx DATABRICKS_ACCESS_TOKEN=dapi...");
            std::process::exit(1);
        }
    };

    let auth = match AuthConfig::from_tokens(config.auth_tokens.clone()) {
        Ok(auth) => Arc::new(auth),
        Err(msg) => {
            eprintln!("Error: {}", msg);
            std::process::exit(1);
        }
    };

    info!(
        backend = %config.backend,
        transport = %config.transport,
        strict_sql = config.strict_sql,
        "Starting SQL chat gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    let backend = Arc::new(Backend::from_config(backend_config));

    if config.eager_connect {
        // A failed eager connect is not fatal; the first query retries
        if let Err(e) = backend.ensure_ready().await {
            warn!(error = %e, "Initial backend connection failed");
        }
    }

    let executor = QueryExecutor::new(config.query_gate(), backend);
    let handler = SqlQueryHandler::new(executor);

    // Run the appropriate transport
    let result = match config.transport {
        TransportMode::Stdio => {
            info!("Using stdio transport");
            let transport = StdioTransport::new(handler);
            transport.run().await
        }
        TransportMode::Http => {
            info!(
                host = %config.http_host,
                port = config.http_port,
                endpoint = %config.mcp_endpoint,
                auth_tokens = auth.token_count(),
                "Using HTTP transport"
            );
            let transport = HttpTransport::new(
                handler,
                auth,
                &config.http_host,
                config.http_port,
                &config.mcp_endpoint,
            );
            transport.run().await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
