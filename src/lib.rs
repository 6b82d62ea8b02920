//! SQL chat gateway library.
//!
//! Validates SQL written by a language model, runs it read-only against
//! Postgres or a Databricks SQL warehouse, and shapes the rows for a chat
//! assistant (MCP tools) or a web client (REST API).

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gate;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::DbError;
pub use mcp::SqlService;
