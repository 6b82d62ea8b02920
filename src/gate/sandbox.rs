//! Table sandbox for the Postgres backend.
//!
//! The Postgres database holds the application's own tables (users, chats,
//! messages, ...) next to the product/review dataset. Statements are scanned
//! textually for references to any table outside the sandbox. The scan is a
//! substring match on the lower-cased statement, so it can reject a column
//! whose name starts with a forbidden table name and it can miss obfuscated
//! identifiers; statements are SELECT-only and the schema is small.

use crate::models::{BackendKind, RejectReason, Rejection};
use tracing::warn;

/// Tables queries may reference.
pub const SANDBOX_TABLES: &[&str] = &["product", "review"];

/// Application tables that live in the same database as the sandbox.
pub const DEFAULT_FORBIDDEN_TABLES: &[&str] = &[
    "user",
    "chat",
    "message",
    "vote",
    "document",
    "suggestion",
    "stream",
];

/// Allow-list plus the forbidden patterns derived from the excluded tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    allowed: Vec<String>,
    forbidden: Vec<String>,
    patterns: Vec<String>,
}

impl Sandbox {
    /// Create a sandbox from allowed and forbidden table names.
    ///
    /// Names are lower-cased. Each forbidden table yields three patterns:
    /// the quoted identifier, the name followed by a space, and the name
    /// preceded by a space.
    pub fn new<A, F>(allowed: A, forbidden: F) -> Self
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        let allowed: Vec<String> = allowed
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        let forbidden: Vec<String> = forbidden
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        let quoted = forbidden.iter().map(|t| format!("\"{}\"", t));
        let trailing = forbidden.iter().map(|t| format!("{} ", t));
        let leading = forbidden.iter().map(|t| format!(" {}", t));
        let patterns = quoted.chain(trailing).chain(leading).collect();

        Self {
            allowed,
            forbidden,
            patterns,
        }
    }

    /// The product/review sandbox with the default forbidden tables.
    pub fn product_review() -> Self {
        Self::new(SANDBOX_TABLES, DEFAULT_FORBIDDEN_TABLES)
    }

    pub fn allowed_tables(&self) -> &[String] {
        &self.allowed
    }

    pub fn forbidden_tables(&self) -> &[String] {
        &self.forbidden
    }

    pub fn forbidden_patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Return the first forbidden pattern found in an already lower-cased statement.
    pub fn find_forbidden(&self, lowered: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|pattern| lowered.contains(pattern.as_str()))
            .map(String::as_str)
    }

    /// Check whether a relation name (unqualified, any case) is in the allow-list.
    pub fn allows_relation(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.allowed.iter().any(|t| *t == name)
    }

    /// Rejection returned for any sandbox violation.
    pub fn rejection(&self) -> Rejection {
        Rejection::with_detail(
            RejectReason::ForbiddenTable,
            format!("Allowed tables: {}.", self.allowed.join(", ")),
        )
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::product_review()
    }
}

/// Which tables a backend's statements may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TablePolicy {
    Sandboxed(Sandbox),
    /// Catalog/schema naming on the warehouse already isolates the dataset.
    Unrestricted,
}

impl TablePolicy {
    /// Default policy for a backend.
    pub fn for_backend(kind: BackendKind) -> Self {
        if kind.sandboxed_by_default() {
            Self::Sandboxed(Sandbox::product_review())
        } else {
            Self::Unrestricted
        }
    }

    /// Scan a lower-cased statement for forbidden table references.
    pub fn check(&self, lowered: &str) -> Result<(), Rejection> {
        match self {
            Self::Unrestricted => Ok(()),
            Self::Sandboxed(sandbox) => match sandbox.find_forbidden(lowered) {
                Some(pattern) => {
                    warn!(pattern = %pattern, "Statement references a table outside the sandbox");
                    Err(sandbox.rejection())
                }
                None => Ok(()),
            },
        }
    }

    pub fn sandbox(&self) -> Option<&Sandbox> {
        match self {
            Self::Sandboxed(sandbox) => Some(sandbox),
            Self::Unrestricted => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_cover_quoted_and_space_bounded_forms() {
        let sandbox = Sandbox::new(["product"], ["user"]);
        assert_eq!(
            sandbox.forbidden_patterns(),
            &["\"user\"".to_string(), "user ".to_string(), " user".to_string()]
        );
    }

    #[test]
    fn test_default_sandbox_has_seven_forbidden_tables() {
        let sandbox = Sandbox::product_review();
        assert_eq!(sandbox.forbidden_tables().len(), 7);
        assert_eq!(sandbox.forbidden_patterns().len(), 21);
        assert_eq!(sandbox.allowed_tables(), &["product", "review"]);
    }

    #[test]
    fn test_find_forbidden_quoted() {
        let sandbox = Sandbox::product_review();
        assert_eq!(
            sandbox.find_forbidden("select * from \"chat\""),
            Some("\"chat\"")
        );
    }

    #[test]
    fn test_find_forbidden_unquoted() {
        let sandbox = Sandbox::product_review();
        assert!(sandbox.find_forbidden("select * from message where 1=1").is_some());
    }

    #[test]
    fn test_sandbox_tables_pass() {
        let sandbox = Sandbox::product_review();
        assert!(
            sandbox
                .find_forbidden("select p.title, r.rating from \"product\" p join \"review\" r on p.parent_asin = r.parent_asin")
                .is_none()
        );
    }

    #[test]
    fn test_names_are_normalized() {
        let sandbox = Sandbox::new(["  Product "], ["USER", ""]);
        assert!(sandbox.allows_relation("PRODUCT"));
        assert_eq!(sandbox.forbidden_tables(), &["user"]);
    }

    #[test]
    fn test_unrestricted_policy_accepts_everything() {
        let policy = TablePolicy::Unrestricted;
        assert!(policy.check("select * from \"user\"").is_ok());
        assert!(policy.sandbox().is_none());
    }

    #[test]
    fn test_policy_for_backend() {
        assert!(matches!(
            TablePolicy::for_backend(BackendKind::Postgres),
            TablePolicy::Sandboxed(_)
        ));
        assert_eq!(
            TablePolicy::for_backend(BackendKind::Warehouse),
            TablePolicy::Unrestricted
        );
    }

    #[test]
    fn test_rejection_lists_allowed_tables() {
        let policy = TablePolicy::for_backend(BackendKind::Postgres);
        let rejection = policy.check("select * from vote ").unwrap_err();
        assert_eq!(rejection.reason, RejectReason::ForbiddenTable);
        assert!(rejection.message().contains("product, review"));
    }
}
