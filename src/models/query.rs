//! Query-related data models.
//!
//! This module defines the types passed between the gate, the connector
//! and the response-shaping layer.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default row limit when the caller does not request one.
pub const DEFAULT_ROW_LIMIT: u32 = 100;

/// Maximum limit the gate will inject.
pub const MAX_ROW_LIMIT: u32 = 1000;

/// Rows handed to the model; the UI receives the full result set.
pub const MODEL_CONTEXT_ROWS: usize = 100;

/// A result row keyed by column name, in column order.
pub type Row = serde_json::Map<String, JsonValue>;

/// An inbound statement together with the caller's row-limit hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub raw_statement: String,
    /// Default: 100, capped at 1000
    #[serde(default)]
    pub requested_limit: Option<u32>,
}

impl QueryRequest {
    /// Create a new query request without a limit hint.
    pub fn new(raw_statement: impl Into<String>) -> Self {
        Self {
            raw_statement: raw_statement.into(),
            requested_limit: None,
        }
    }

    /// Set the requested row limit.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.requested_limit = Some(limit);
        self
    }
}

/// A statement accepted by the gate, ready for execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedStatement {
    /// Final statement text; always starts with `select` (case-insensitive).
    pub text: String,
    pub applied_limit: u32,
    /// False when the statement already carried a limit clause.
    pub limit_was_injected: bool,
}

/// Rows returned by a statement the gate accepted.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub statement: ValidatedStatement,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn new(statement: ValidatedStatement, rows: Vec<Row>, execution_time_ms: u64) -> Self {
        Self {
            row_count: rows.len(),
            rows,
            statement,
            execution_time_ms,
        }
    }

    /// Column names in result order, taken from the first row.
    pub fn columns(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Why the gate refused a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotASelect,
    ForbiddenTable,
    InvalidLimit,
    /// Strict mode only
    MultipleStatements,
}

impl RejectReason {
    /// User-facing message for this reason.
    pub fn message(&self) -> &'static str {
        match self {
            Self::NotASelect => {
                "Only SELECT queries are allowed for security reasons. No INSERT, UPDATE, DELETE, or other modification queries."
            }
            Self::ForbiddenTable => {
                "Access denied. Only queries on the sandboxed tables are allowed."
            }
            Self::InvalidLimit => "Row limit must be a positive integer.",
            Self::MultipleStatements => "Only a single SELECT statement can run per query.",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotASelect => write!(f, "not_a_select"),
            Self::ForbiddenTable => write!(f, "forbidden_table"),
            Self::InvalidLimit => write!(f, "invalid_limit"),
            Self::MultipleStatements => write!(f, "multiple_statements"),
        }
    }
}

/// A gate rejection with an optional detail appended to the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub detail: Option<String>,
}

impl Rejection {
    pub fn new(reason: RejectReason) -> Self {
        Self {
            reason,
            detail: None,
        }
    }

    pub fn with_detail(reason: RejectReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: Some(detail.into()),
        }
    }

    /// Full user-facing message.
    pub fn message(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{} {}", self.reason.message(), detail),
            None => self.reason.message().to_string(),
        }
    }
}

/// Result of running one request through the gate and the connector.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Success {
        rows: Vec<Row>,
        row_count: usize,
        statement: ValidatedStatement,
    },
    Rejected {
        reason: RejectReason,
        message: String,
    },
    ExecutionFailed {
        message: String,
    },
}

impl QueryOutcome {
    /// Check if the statement ran successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Get the rejection reason, if the gate refused the statement.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::Rejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

impl From<QueryResult> for QueryOutcome {
    fn from(result: QueryResult) -> Self {
        Self::Success {
            row_count: result.row_count,
            rows: result.rows,
            statement: result.statement,
        }
    }
}

impl From<Rejection> for QueryOutcome {
    fn from(rejection: Rejection) -> Self {
        Self::Rejected {
            reason: rejection.reason,
            message: rejection.message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_request_builder() {
        let req = QueryRequest::new("select * from product").with_limit(5000);
        assert_eq!(req.requested_limit, Some(5000));
    }

    #[test]
    fn test_query_request_deserialization() {
        let req: QueryRequest =
            serde_json::from_str(r#"{"raw_statement": "select 1"}"#).unwrap();
        assert_eq!(req.raw_statement, "select 1");
        assert!(req.requested_limit.is_none());
    }

    #[test]
    fn test_rejection_message_includes_detail() {
        let rejection =
            Rejection::with_detail(RejectReason::ForbiddenTable, "Allowed tables: product.");
        let msg = rejection.message();
        assert!(msg.starts_with("Access denied."));
        assert!(msg.ends_with("Allowed tables: product."));
    }

    #[test]
    fn test_outcome_from_rejection() {
        let outcome = QueryOutcome::from(Rejection::new(RejectReason::NotASelect));
        assert!(!outcome.is_success());
        assert_eq!(outcome.reject_reason(), Some(RejectReason::NotASelect));
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let outcome = QueryOutcome::ExecutionFailed {
            message: "boom".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "execution_failed");
        assert_eq!(json["message"], "boom");
    }
}
