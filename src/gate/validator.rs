//! Statement validation and limit injection.
//!
//! The gate decides, deterministically and without side effects, whether a
//! caller-supplied SQL string may run, and normalizes it:
//!
//! 1. The trimmed, lower-cased statement must start with `select`. This is a
//!    prefix check: it does not catch `select ...; drop ...` or mutating CTEs
//!    wrapped in a SELECT (strict mode does).
//! 2. The table policy scans the statement for forbidden tables.
//! 3. When the statement has no `limit` token, ` LIMIT {min(requested, 1000)}`
//!    is appended. An existing limit is never rewritten, even above the cap.
//!
//! Syntax errors are left to the backend.

use crate::gate::sandbox::TablePolicy;
use crate::gate::strict::{self, StrictDialect};
use crate::models::{
    BackendKind, DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT, RejectReason, Rejection, ValidatedStatement,
};
use tracing::debug;

/// Stateless statement gate, configured per backend.
#[derive(Debug, Clone)]
pub struct QueryGate {
    policy: TablePolicy,
    strict: Option<StrictDialect>,
}

impl QueryGate {
    /// Create a gate with the given table policy (strict mode off).
    pub fn new(policy: TablePolicy) -> Self {
        Self {
            policy,
            strict: None,
        }
    }

    /// Create the default gate for a backend.
    pub fn for_backend(kind: BackendKind) -> Self {
        Self::new(TablePolicy::for_backend(kind))
    }

    /// Enable AST-based checks with the given dialect.
    pub fn with_strict(mut self, dialect: StrictDialect) -> Self {
        self.strict = Some(dialect);
        self
    }

    pub fn policy(&self) -> &TablePolicy {
        &self.policy
    }

    pub fn is_strict(&self) -> bool {
        self.strict.is_some()
    }

    /// Validate a raw statement and apply the row limit.
    ///
    /// `requested_limit` defaults to 100 and is capped at 1000; zero is rejected.
    pub fn validate(
        &self,
        raw_statement: &str,
        requested_limit: Option<u32>,
    ) -> Result<ValidatedStatement, Rejection> {
        let trimmed = raw_statement.trim();
        if !is_select(trimmed) {
            return Err(Rejection::new(RejectReason::NotASelect));
        }

        self.policy.check(&raw_statement.to_lowercase())?;

        if let Some(dialect) = self.strict {
            strict::check_statement(trimmed, dialect, &self.policy)?;
        }

        let requested = requested_limit.unwrap_or(DEFAULT_ROW_LIMIT);
        if requested == 0 {
            return Err(Rejection::new(RejectReason::InvalidLimit));
        }
        let effective_limit = requested.min(MAX_ROW_LIMIT);

        let validated = if has_limit(trimmed) {
            ValidatedStatement {
                text: trimmed.to_string(),
                applied_limit: effective_limit,
                limit_was_injected: false,
            }
        } else {
            ValidatedStatement {
                text: format!("{} LIMIT {}", trimmed, effective_limit),
                applied_limit: effective_limit,
                limit_was_injected: true,
            }
        };

        debug!(
            sql = %validated.text,
            limit = effective_limit,
            injected = validated.limit_was_injected,
            "Statement accepted"
        );
        Ok(validated)
    }
}

impl Default for QueryGate {
    fn default() -> Self {
        Self::for_backend(BackendKind::default())
    }
}

/// Prefix check on the trimmed, lower-cased statement.
pub fn is_select(statement: &str) -> bool {
    statement.trim().to_lowercase().starts_with("select")
}

/// Substring check for an existing limit clause.
pub fn has_limit(statement: &str) -> bool {
    statement.to_lowercase().contains("limit")
}
