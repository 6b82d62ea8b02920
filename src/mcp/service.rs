//! MCP service implementation using rmcp.
//!
//! This module defines the SqlService struct that exposes the query tool and
//! the suggestion catalogue to chat assistants via the rmcp framework's macros.

use crate::db::StatementExecutor;
use crate::error::DbError;
use crate::gate::TablePolicy;
use crate::tools::query::{SqlQueryHandler, SqlQueryInput, SqlQueryOutput};
use crate::tools::suggestions::{ListSuggestionsInput, ListSuggestionsOutput, list_suggestions};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use tracing::debug;

pub struct SqlService<E> {
    /// Shared query path (gate + backend)
    handler: SqlQueryHandler<E>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl<E> Clone for SqlService<E> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            tool_router: self.tool_router.clone(),
        }
    }
}

impl<E: StatementExecutor> SqlService<E> {
    pub fn new(handler: SqlQueryHandler<E>) -> Self {
        Self {
            handler,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl<E: StatementExecutor> SqlService<E> {
    #[tool(
        description = "Execute a SQL query against the product/review dataset.\nOnly a single SELECT statement is allowed. Always use double quotes for table names (e.g., \"Product\", \"Review\").\nResults returned to you are limited to 100 rows (`data`), while the user's UI displays all results (`fullData`, up to 1000 rows).\nOptional `format`: markdown or csv renders the full result into `formatted`."
    )]
    async fn execute_sql_query(
        &self,
        Parameters(input): Parameters<SqlQueryInput>,
    ) -> Result<Json<SqlQueryOutput>, McpError> {
        debug!(query = %input.query, "execute_sql_query called");
        self.handler
            .tool_query(input)
            .await
            .map(Json)
            .map_err(|e: DbError| e.into())
    }

    #[tool(
        description = "List starter questions about the product/review dataset.\nOptionally filter by category: products, reviews or analytics."
    )]
    async fn list_sql_suggestions(
        &self,
        Parameters(input): Parameters<ListSuggestionsInput>,
    ) -> Json<ListSuggestionsOutput> {
        Json(list_suggestions(input.category))
    }
}

#[tool_handler]
impl<E: StatementExecutor> ServerHandler for SqlService<E> {
    fn get_info(&self) -> ServerInfo {
        let executor = self.handler.executor();
        let backend = executor.executor().backend();
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "sql-chat-gateway".to_owned(),
                title: Some("SQL Chat Gateway".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Read-only SQL access to a product/review dataset ({} backend).\n\
                \n\
                ## Workflow\n\
                1. Optionally call `list_sql_suggestions` for starter questions\n\
                2. Call `execute_sql_query` with a single SELECT statement\n\
                \n\
                ## Rules\n\
                - Only SELECT statements run; anything else is rejected\n\
                - {}\n\
                - Without a LIMIT clause at most 1000 rows are fetched; you see the first 100",
                backend.display_name(),
                table_rule(executor.gate().policy())
            )),
        }
    }
}

/// Instruction line describing which tables the gate lets through.
fn table_rule(policy: &TablePolicy) -> String {
    match policy {
        TablePolicy::Sandboxed(sandbox) => {
            let tables: Vec<String> = sandbox
                .allowed_tables()
                .iter()
                .map(|t| format!("\"{}\"", capitalize(t)))
                .collect();
            format!("Only the {} tables may be queried", tables.join(", "))
        }
        TablePolicy::Unrestricted => {
            "Any table in the configured catalog and schema may be queried".to_string()
        }
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
