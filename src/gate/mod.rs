//! Query gate.
//!
//! Every inbound SQL string passes through the gate before it can reach a
//! backend:
//! - `validator`: SELECT-only prefix check, table policy, limit injection
//! - `sandbox`: table allow-list and forbidden-pattern scan
//! - `strict`: optional AST-based checks using sqlparser

pub mod sandbox;
pub mod strict;
pub mod validator;

pub use sandbox::{DEFAULT_FORBIDDEN_TABLES, SANDBOX_TABLES, Sandbox, TablePolicy};
pub use strict::StrictDialect;
pub use validator::QueryGate;
