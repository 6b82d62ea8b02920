//! Structural statement checks.
//!
//! The default gate only inspects prefixes and substrings, which lets
//! `select 1; drop table product` and SELECT-wrapped mutating CTEs through.
//! Strict mode parses the statement with [sqlparser](https://docs.rs/sqlparser/)
//! and checks it on the AST instead: exactly one statement, a read-only query,
//! and (under a sandboxed policy) only allow-listed relations.
//!
//! A `Query` node is not necessarily read-only. `SELECT ... INTO` creates a
//! table, `FOR UPDATE` takes row locks, and data-modifying CTEs nest
//! INSERT/UPDATE/DELETE inside a query body. All of these are rejected.

use crate::gate::sandbox::TablePolicy;
use crate::models::{RejectReason, Rejection};
use sqlparser::ast::{Query, SetExpr, Statement, Visit, Visitor, visit_relations};
use sqlparser::dialect::{Dialect, GenericDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;
use std::ops::ControlFlow;
use tracing::debug;

/// Dialect used to parse statements in strict mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrictDialect {
    #[default]
    Postgres,
    Generic,
}

impl StrictDialect {
    fn dialect(&self) -> Box<dyn Dialect> {
        match self {
            Self::Postgres => Box::new(PostgreSqlDialect {}),
            Self::Generic => Box::new(GenericDialect {}),
        }
    }
}

/// Parse `sql` and reject anything that is not a single query over permitted relations.
pub fn check_statement(
    sql: &str,
    dialect: StrictDialect,
    policy: &TablePolicy,
) -> Result<(), Rejection> {
    let dialect = dialect.dialect();
    let statements = Parser::parse_sql(dialect.as_ref(), sql).map_err(|e| {
        Rejection::with_detail(
            RejectReason::NotASelect,
            format!("Statement could not be parsed: {}.", e),
        )
    })?;

    let statement = match statements.as_slice() {
        [] => return Err(Rejection::new(RejectReason::NotASelect)),
        [statement] => statement,
        _ => {
            debug!(count = statements.len(), "Rejecting multi-statement input");
            return Err(Rejection::new(RejectReason::MultipleStatements));
        }
    };

    if !matches!(statement, Statement::Query(_)) {
        return Err(Rejection::with_detail(
            RejectReason::NotASelect,
            format!("Found {}.", operation_name(statement)),
        ));
    }

    if let ControlFlow::Break(found) = statement.visit(&mut MutationFinder) {
        debug!(found, "Rejecting query with side effects");
        return Err(Rejection::with_detail(
            RejectReason::NotASelect,
            format!("Found {}.", found),
        ));
    }

    if let TablePolicy::Sandboxed(sandbox) = policy {
        let ctes = cte_names(statement);
        for table in referenced_tables(statement) {
            if !ctes.contains(&table) && !sandbox.allows_relation(&table) {
                debug!(table = %table, "Relation outside the sandbox");
                return Err(sandbox.rejection());
            }
        }
    }

    Ok(())
}

/// Unqualified, unquoted, lower-cased names of every relation the statement reads.
pub fn referenced_tables(statement: &Statement) -> Vec<String> {
    let mut tables = Vec::new();
    let _ = visit_relations(statement, |relation| {
        tables.push(relation_name(&relation.to_string()));
        ControlFlow::<()>::Continue(())
    });
    tables
}

fn relation_name(display: &str) -> String {
    display
        .rsplit('.')
        .next()
        .unwrap_or(display)
        .trim_matches(|c: char| c == '"' || c == '`')
        .to_lowercase()
}

/// Collects CTE aliases at every nesting level.
struct CteCollector(Vec<String>);

impl Visitor for CteCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.0.push(cte.alias.name.value.to_lowercase());
            }
        }
        ControlFlow::Continue(())
    }
}

/// Stops at the first query, at any nesting level, that writes or locks.
struct MutationFinder;

impl Visitor for MutationFinder {
    type Break = &'static str;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if !query.locks.is_empty() {
            return ControlFlow::Break("a FOR UPDATE/FOR SHARE locking clause");
        }
        match body_mutation(&query.body) {
            Some(found) => ControlFlow::Break(found),
            None => ControlFlow::Continue(()),
        }
    }
}

/// Nested `SetExpr::Query` bodies are reached by the visitor itself.
fn body_mutation(body: &SetExpr) -> Option<&'static str> {
    match body {
        SetExpr::Select(select) if select.into.is_some() => Some("SELECT INTO"),
        SetExpr::SetOperation { left, right, .. } => {
            body_mutation(left).or_else(|| body_mutation(right))
        }
        SetExpr::Insert(_) => Some("INSERT"),
        SetExpr::Update(_) => Some("UPDATE"),
        SetExpr::Delete(_) => Some("DELETE"),
        SetExpr::Merge(_) => Some("MERGE"),
        _ => None,
    }
}

fn cte_names(statement: &Statement) -> Vec<String> {
    let mut collector = CteCollector(Vec::new());
    let _ = statement.visit(&mut collector);
    collector.0
}

/// Short operation name for rejection messages.
fn operation_name(statement: &Statement) -> &'static str {
    match statement {
        Statement::Insert { .. } => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete { .. } => "DELETE",
        Statement::Merge { .. } => "MERGE",
        Statement::Drop { .. } => "DROP",
        Statement::Truncate { .. } => "TRUNCATE",
        Statement::CreateTable { .. } => "CREATE TABLE",
        Statement::AlterTable { .. } => "ALTER TABLE",
        Statement::Grant { .. } => "GRANT",
        _ => "a non-query statement",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::sandbox::Sandbox;

    fn sandboxed() -> TablePolicy {
        TablePolicy::Sandboxed(Sandbox::product_review())
    }

    #[test]
    fn test_single_select_passes() {
        assert!(
            check_statement(
                "SELECT title FROM \"Product\" LIMIT 10",
                StrictDialect::Postgres,
                &sandboxed()
            )
            .is_ok()
        );
    }

    #[test]
    fn test_multiple_statements_rejected() {
        let rejection = check_statement(
            "select 1; drop table product",
            StrictDialect::Postgres,
            &TablePolicy::Unrestricted,
        )
        .unwrap_err();
        assert_eq!(rejection.reason, RejectReason::MultipleStatements);
    }

    #[test]
    fn test_unparseable_statement_rejected() {
        let rejection = check_statement(
            "select * from product where (",
            StrictDialect::Postgres,
            &TablePolicy::Unrestricted,
        )
        .unwrap_err();
        assert_eq!(rejection.reason, RejectReason::NotASelect);
        assert!(rejection.message().contains("could not be parsed"));
    }

    #[test]
    fn test_select_into_rejected() {
        let rejection = check_statement(
            "select * into product_copy from product",
            StrictDialect::Postgres,
            &sandboxed(),
        )
        .unwrap_err();
        assert_eq!(rejection.reason, RejectReason::NotASelect);
        assert!(rejection.message().contains("SELECT INTO"));
    }

    #[test]
    fn test_select_into_in_union_branch_rejected() {
        let rejection = check_statement(
            "select title from product union all select title into scratch from review",
            StrictDialect::Postgres,
            &TablePolicy::Unrestricted,
        )
        .unwrap_err();
        assert!(rejection.message().contains("SELECT INTO"));
    }

    #[test]
    fn test_locking_clauses_rejected() {
        for sql in [
            "select * from product for update",
            "select * from review for share",
            "select * from (select * from product for update) p",
        ] {
            let rejection = check_statement(sql, StrictDialect::Postgres, &sandboxed())
                .unwrap_err();
            assert_eq!(rejection.reason, RejectReason::NotASelect, "{}", sql);
            assert!(rejection.message().contains("FOR UPDATE"), "{}", sql);
        }
    }

    #[test]
    fn test_data_modifying_cte_rejected() {
        for (sql, found) in [
            ("with gone as (delete from review returning *) select * from gone", "DELETE"),
            (
                "with moved as (update product set rating = 0 returning *) select * from moved",
                "UPDATE",
            ),
            (
                "with added as (insert into review (rating) values (5) returning *) select * from added",
                "INSERT",
            ),
        ] {
            let rejection = check_statement(sql, StrictDialect::Postgres, &TablePolicy::Unrestricted)
                .unwrap_err();
            assert_eq!(rejection.reason, RejectReason::NotASelect, "{}", sql);
            assert!(rejection.message().contains(found), "{}", sql);
        }
    }

    #[test]
    fn test_forbidden_relation_rejected() {
        let rejection = check_statement(
            "select * from \"User\"",
            StrictDialect::Postgres,
            &sandboxed(),
        )
        .unwrap_err();
        assert_eq!(rejection.reason, RejectReason::ForbiddenTable);
    }

    #[test]
    fn test_unlisted_relation_rejected_even_without_pattern_match() {
        // `accounts` is not in the forbidden list, but it is not allow-listed either
        let rejection =
            check_statement("select * from accounts", StrictDialect::Postgres, &sandboxed())
                .unwrap_err();
        assert_eq!(rejection.reason, RejectReason::ForbiddenTable);
    }

    #[test]
    fn test_subquery_relations_checked() {
        let sql = "select * from product where parent_asin in (select parent_asin from \"Chat\")";
        assert!(check_statement(sql, StrictDialect::Postgres, &sandboxed()).is_err());
    }

    #[test]
    fn test_cte_names_are_allowed() {
        let sql = r#"
            WITH top_rated AS (
                SELECT parent_asin, average_rating FROM "Product" WHERE rating_number > 100
            )
            SELECT t.parent_asin, COUNT(*) FROM top_rated t
            JOIN "Review" r ON r.parent_asin = t.parent_asin
            GROUP BY t.parent_asin
        "#;
        assert!(check_statement(sql, StrictDialect::Postgres, &sandboxed()).is_ok());
    }

    #[test]
    fn test_unrestricted_policy_skips_relation_check() {
        assert!(
            check_statement(
                "select * from main.reviews.amazon_reviews",
                StrictDialect::Generic,
                &TablePolicy::Unrestricted
            )
            .is_ok()
        );
    }

    #[test]
    fn test_relation_name_strips_qualifier_and_quotes() {
        assert_eq!(relation_name("public.\"Product\""), "product");
        assert_eq!(relation_name("review"), "review");
        assert_eq!(relation_name("`catalog`.`Review`"), "review");
    }

    #[test]
    fn test_referenced_tables_lists_joins() {
        let statements = Parser::parse_sql(
            &PostgreSqlDialect {},
            "select * from product p join review r on p.parent_asin = r.parent_asin",
        )
        .unwrap();
        let tables = referenced_tables(&statements[0]);
        assert_eq!(tables, vec!["product".to_string(), "review".to_string()]);
    }
}
