//! SQL query tool.
//!
//! Both boundaries run statements through the same [`QueryExecutor`] and
//! differ only in how they shape the result:
//!
//! - the REST API returns the full result set (`data`);
//! - the model tool returns at most 100 rows in `data` for the model's
//!   context and the complete result in `fullData` for the UI.

use crate::db::{QueryExecutor, StatementExecutor};
use crate::error::DbResult;
use crate::models::{MAX_ROW_LIMIT, MODEL_CONTEXT_ROWS, QueryRequest, Row};
use crate::tools::format::{self, OutputFormat};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Row limit the tool requests when the model gives none: the UI shows the
/// whole capped result, the model only the first 100 rows.
pub const TOOL_DEFAULT_LIMIT: u32 = MAX_ROW_LIMIT;

/// Input for the `execute_sql_query` tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SqlQueryInput {
    /// The SQL query to execute. Must be a single SELECT statement. Use double quotes for table names (e.g. "Product", "Review").
    pub query: String,
    /// Maximum rows to fetch when the query has no LIMIT. Default: 1000, max: 1000
    #[serde(default)]
    pub limit: Option<u32>,
    /// Also render the full result: "json" (default, no rendering), "markdown", "csv" or "table"
    #[serde(default)]
    pub format: OutputFormat,
}

/// Output from the `execute_sql_query` tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SqlQueryOutput {
    pub success: bool,
    /// Total rows returned by the statement
    pub row_count: usize,
    /// At most 100 rows, for model context
    pub data: Vec<Row>,
    /// Every row, for UI display
    pub full_data: Vec<Row>,
    /// The statement that ran, including any injected LIMIT
    pub query: String,
    /// True when `data` holds fewer rows than `fullData`
    pub is_limited: bool,
    /// Rendered result when a text format was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
}

/// Body of `POST /api/sql`.
#[derive(Debug, Clone, Deserialize)]
pub struct SqlApiRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Success body of `POST /api/sql`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlApiResponse {
    pub success: bool,
    pub row_count: usize,
    pub data: Vec<Row>,
    pub query: String,
}

/// Handler shared by the REST route and the model tool.
pub struct SqlQueryHandler<E> {
    executor: QueryExecutor<E>,
}

impl<E> Clone for SqlQueryHandler<E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
        }
    }
}

impl<E: StatementExecutor> SqlQueryHandler<E> {
    pub fn new(executor: QueryExecutor<E>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &QueryExecutor<E> {
        &self.executor
    }

    /// Handle `POST /api/sql`. The limit defaults to 100.
    pub async fn api_query(&self, input: SqlApiRequest) -> DbResult<SqlApiResponse> {
        let request = QueryRequest {
            raw_statement: input.query,
            requested_limit: input.limit,
        };
        let result = self.executor.execute(&request).await?;

        Ok(SqlApiResponse {
            success: true,
            row_count: result.row_count,
            data: result.rows,
            query: result.statement.text,
        })
    }

    /// Handle the `execute_sql_query` tool call.
    pub async fn tool_query(&self, input: SqlQueryInput) -> DbResult<SqlQueryOutput> {
        let request = QueryRequest {
            raw_statement: input.query,
            requested_limit: Some(input.limit.unwrap_or(TOOL_DEFAULT_LIMIT)),
        };
        let result = self.executor.execute(&request).await?;

        let formatted = format::render(
            input.format,
            &result.columns(),
            &result.rows,
            result.execution_time_ms,
        )?;
        let data: Vec<Row> = result.rows.iter().take(MODEL_CONTEXT_ROWS).cloned().collect();
        let is_limited = data.len() < result.row_count;

        info!(
            row_count = result.row_count,
            model_rows = data.len(),
            is_limited,
            "Tool query shaped"
        );

        Ok(SqlQueryOutput {
            success: true,
            row_count: result.row_count,
            data,
            full_data: result.rows,
            query: result.statement.text,
            is_limited,
            formatted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_input_defaults() {
        let input: SqlQueryInput =
            serde_json::from_str(r#"{"query": "select * from product"}"#).unwrap();
        assert!(input.limit.is_none());
        assert_eq!(input.format, OutputFormat::Json);
    }

    #[test]
    fn test_tool_input_format() {
        let input: SqlQueryInput =
            serde_json::from_str(r#"{"query": "select 1", "limit": 5, "format": "csv"}"#)
                .unwrap();
        assert_eq!(input.limit, Some(5));
        assert_eq!(input.format, OutputFormat::Csv);
    }

    #[test]
    fn test_tool_output_uses_camel_case() {
        let output = SqlQueryOutput {
            success: true,
            row_count: 0,
            data: Vec::new(),
            full_data: Vec::new(),
            query: "select 1 LIMIT 1000".to_string(),
            is_limited: false,
            formatted: None,
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["rowCount"], 0);
        assert_eq!(json["isLimited"], false);
        assert!(json.get("fullData").is_some());
        assert!(json.get("formatted").is_none());
    }

    #[test]
    fn test_api_response_shape() {
        let response = SqlApiResponse {
            success: true,
            row_count: 2,
            data: Vec::new(),
            query: "select * from product LIMIT 100".to_string(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["rowCount"], 2);
        assert_eq!(json["query"], "select * from product LIMIT 100");
    }
}
