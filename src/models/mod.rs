//! Data models for the SQL chat gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod backend;
pub mod query;

// Re-export commonly used types
pub use backend::BackendKind;
pub use query::{
    DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT, MODEL_CONTEXT_ROWS, QueryOutcome, QueryRequest,
    QueryResult, RejectReason, Rejection, Row, ValidatedStatement,
};
