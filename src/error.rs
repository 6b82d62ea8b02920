//! Error types for the SQL chat gateway.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Gate rejections, driver failures and configuration problems share one enum so
//! that both boundaries (HTTP and MCP) can map them uniformly without leaking
//! connection internals.

use crate::models::{RejectReason, Rejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("{message}")]
    Rejected {
        reason: RejectReason,
        message: String,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("{message}")]
    Execution {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Rejected {
                reason: RejectReason::ForbiddenTable,
                ..
            } => Some("Query only the product and review tables"),
            _ => None,
        }
    }

    /// Get the rejection reason if the gate refused the statement.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::Rejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Check if this failure looks like a session the warehouse expired.
    ///
    /// Warehouses surface idle-session expiry only as an execution error, so
    /// the classification is a message heuristic: any mention of `400` or
    /// `session`.
    pub fn is_stale_session(&self) -> bool {
        match self {
            Self::Execution { message, .. } | Self::Connection { message, .. } => {
                is_stale_session_message(message)
            }
            _ => false,
        }
    }

    /// HTTP status for this error on the REST boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Rejected {
                reason: RejectReason::ForbiddenTable,
                ..
            } => StatusCode::FORBIDDEN,
            Self::Rejected { .. } | Self::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to API clients.
    pub fn client_message(&self) -> String {
        match self {
            Self::Rejected { message, .. } => message.clone(),
            Self::InvalidInput { .. } => self.to_string(),
            _ => format!("SQL execution failed: {}", self),
        }
    }
}

/// Stale-session heuristic shared by the connector and error classification.
pub fn is_stale_session_message(message: &str) -> bool {
    message.contains("400") || message.to_ascii_lowercase().contains("session")
}

impl From<Rejection> for DbError {
    fn from(rejection: Rejection) -> Self {
        Self::Rejected {
            reason: rejection.reason,
            message: rejection.message(),
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the POSTGRES_URL format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(db_err.message(), code)
            }
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Convert HTTP client errors from the warehouse driver to DbError.
impl From<reqwest::Error> for DbError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DbError::timeout("warehouse request", 0)
        } else if err.is_connect() {
            DbError::connection(
                format!("Warehouse unreachable: {}", err),
                "Check DATABRICKS_SERVER_HOSTNAME and network connectivity",
            )
        } else if err.is_decode() {
            DbError::internal(format!("Malformed warehouse response: {}", err))
        } else {
            DbError::execution(format!("Warehouse request failed: {}", err), None)
        }
    }
}

/// Result type alias for gateway operations.
pub type DbResult<T> = Result<T, DbError>;

/// Build suggestion data as JSON value.
fn suggestion_data(suggestion: Option<&str>) -> Option<serde_json::Value> {
    suggestion.map(|s| serde_json::json!({ "suggestion": s }))
}

/// Convert DbError to MCP ErrorData for semantic error categorization.
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        match &err {
            // Caller mistakes -> invalid_params
            DbError::Rejected { .. } | DbError::InvalidInput { .. } => {
                rmcp::ErrorData::invalid_params(err.to_string(), suggestion_data(err.suggestion()))
            }

            // SQL errors -> invalid_params with sql_state in message
            DbError::Execution { message, sql_state } => {
                let msg = match sql_state {
                    Some(code) => format!("{} (SQLSTATE: {})", message, code),
                    None => message.clone(),
                };
                rmcp::ErrorData::invalid_params(
                    msg,
                    suggestion_data(Some("Check the SQL syntax and referenced columns")),
                )
            }

            DbError::Connection { suggestion, .. } => {
                rmcp::ErrorData::internal_error(err.to_string(), suggestion_data(Some(suggestion)))
            }
            DbError::Timeout { .. } => rmcp::ErrorData::internal_error(
                err.to_string(),
                suggestion_data(Some("Narrow the query or add a tighter LIMIT")),
            ),
            DbError::Configuration { .. } | DbError::Internal { .. } => {
                rmcp::ErrorData::internal_error(err.to_string(), None)
            }
        }
    }
}

/// Uniform `{ "error": message }` body for the REST boundary.
impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({ "error": self.client_message() });
        (status, axum::Json(body)).into_response()
    }
}
