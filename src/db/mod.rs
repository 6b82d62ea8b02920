//! Backend access layer.
//!
//! This module provides:
//! - The driver trait and its Postgres and Databricks implementations
//! - The cached, self-healing connector
//! - Statement execution behind one interface for both backends
//! - Type mappings from backend rows to JSON
//! - Backend dispatch macros for reducing code duplication

pub mod connector;
pub mod databricks;
pub mod driver;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod postgres;
pub mod types;

pub use connector::{Connector, ConnectorState};
pub use databricks::{DatabricksConfig, DatabricksDriver};
pub use driver::WarehouseDriver;
pub use executor::{Backend, QueryExecutor, StatementExecutor};
pub use postgres::{PostgresConfig, PostgresDriver};
