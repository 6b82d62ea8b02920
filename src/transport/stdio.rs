//! Stdio transport.
//!
//! Serves the MCP tools over standard input/output, the standard mode for
//! CLI-based MCP integrations. The REST API is not available in this mode.

use crate::db::StatementExecutor;
use crate::error::{DbError, DbResult};
use crate::mcp::SqlService;
use crate::tools::SqlQueryHandler;
use crate::transport::{Transport, wait_for_signal};
use rmcp::{ServiceExt, transport::stdio};
use tracing::{info, warn};

/// Stdio transport implementation.
///
/// This transport reads JSON-RPC messages from stdin and writes
/// responses to stdout.
pub struct StdioTransport<E> {
    handler: SqlQueryHandler<E>,
}

impl<E: StatementExecutor> StdioTransport<E> {
    pub fn new(handler: SqlQueryHandler<E>) -> Self {
        Self { handler }
    }
}

impl<E: StatementExecutor> Transport for StdioTransport<E> {
    async fn run(&self) -> DbResult<()> {
        info!("Starting MCP server with stdio transport");

        let service = SqlService::new(self.handler.clone());
        let running_service = service
            .serve(stdio())
            .await
            .map_err(|e| DbError::internal(format!("Failed to start stdio transport: {}", e)))?;

        let shutdown_requested = tokio::select! {
            result = running_service.waiting() => {
                match result {
                    Ok(_quit_reason) => info!("Stdio transport completed normally"),
                    Err(e) => {
                        warn!(error = %e, "Stdio transport error");
                        return Err(DbError::internal(format!("Stdio transport error: {}", e)));
                    }
                }
                false
            }
            _ = wait_for_signal() => {
                info!("Shutdown signal received (send again to force exit)");
                true
            }
        };

        if shutdown_requested {
            tokio::spawn(async {
                wait_for_signal().await;
                warn!("Received second signal, forcing immediate exit");
                std::process::exit(1);
            });
        }

        self.handler.executor().executor().shutdown().await;

        if shutdown_requested {
            // A blocking stdin read cannot be interrupted by select!
            info!("Exiting process");
            std::process::exit(0);
        }

        Ok(())
    }
}
