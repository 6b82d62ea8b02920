//! Backend selection model.

use clap::ValueEnum;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Analytical store the gateway runs statements against.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Postgres database holding the app schema; queries are sandboxed to
    /// the product/review tables.
    #[default]
    Postgres,
    /// Databricks SQL warehouse; the catalog/schema already isolates the dataset.
    Warehouse,
}

impl BackendKind {
    /// Get the display name for this backend.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::Warehouse => "Databricks SQL warehouse",
        }
    }

    /// Whether the table sandbox applies to this backend by default.
    pub fn sandboxed_by_default(&self) -> bool {
        matches!(self, Self::Postgres)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres"),
            Self::Warehouse => write!(f, "warehouse"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_display() {
        assert_eq!(BackendKind::Postgres.to_string(), "postgres");
        assert_eq!(BackendKind::Warehouse.to_string(), "warehouse");
    }

    #[test]
    fn test_backend_serialization() {
        let json = serde_json::to_string(&BackendKind::Warehouse).unwrap();
        assert_eq!(json, "\"warehouse\"");
    }

    #[test]
    fn test_only_postgres_is_sandboxed() {
        assert!(BackendKind::Postgres.sandboxed_by_default());
        assert!(!BackendKind::Warehouse.sandboxed_by_default());
    }
}
