//! Allow-list validation for caller-supplied SQL fragments.
//!
//! Identifiers, comparison operators and ORDER BY expressions are spliced
//! into statement text, so each is normalized against a fixed grammar
//! before use. Anything outside the grammar is rejected, never escaped.

use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

const COMPARISON_OPERATORS: &[&str] = &[
    "=",
    "!=",
    "<>",
    ">",
    ">=",
    "<",
    "<=",
    "LIKE",
    "NOT LIKE",
    "GLOB",
    "IS",
    "IS NOT",
    "IS DISTINCT FROM",
    "IS NOT DISTINCT FROM",
];

const ORDER_DIRECTIONS: &[&str] = &[
    "ASC",
    "DESC",
    "ASC NULLS FIRST",
    "ASC NULLS LAST",
    "DESC NULLS FIRST",
    "DESC NULLS LAST",
];

/// Validates a possibly dotted identifier (`column` or `table.column`).
pub(crate) fn normalize_identifier(identifier: &str) -> Option<String> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return None;
    }
    let parts: Vec<&str> = identifier.split('.').collect();
    if parts.iter().all(|part| IDENTIFIER_PART.is_match(part)) {
        Some(parts.join("."))
    } else {
        None
    }
}

/// Double-quotes every part of a validated identifier.
pub(crate) fn quote_identifier(identifier: &str) -> String {
    identifier
        .split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(".")
}

fn normalize_keyword_run(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase()
}

pub(crate) fn normalize_operator(operator: &str) -> Option<&'static str> {
    let normalized = normalize_keyword_run(operator);
    COMPARISON_OPERATORS
        .iter()
        .copied()
        .find(|candidate| *candidate == normalized)
}

pub(crate) fn normalize_order_direction(direction: &str) -> Option<&'static str> {
    let normalized = normalize_keyword_run(direction);
    ORDER_DIRECTIONS
        .iter()
        .copied()
        .find(|candidate| *candidate == normalized)
}

/// Validates `column [direction]` and returns it with the column quoted.
pub(crate) fn normalize_order_expr(expr: &str) -> Option<String> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    let (column, direction) = parts.split_first()?;
    if direction.len() > 3 {
        return None;
    }
    let column = quote_identifier(&normalize_identifier(column)?);
    if direction.is_empty() {
        return Some(column);
    }
    let direction = normalize_order_direction(&direction.join(" "))?;
    Some(format!("{column} {direction}"))
}

/// Accepts a single `SELECT` statement without comments or terminators.
pub(crate) fn normalize_subquery(query: &str) -> Option<String> {
    let query = query.trim();
    let lower = query.to_ascii_lowercase();
    if !lower.starts_with("select ") {
        return None;
    }
    if [";", "--", "/*", "*/"]
        .iter()
        .any(|token| lower.contains(token))
    {
        return None;
    }
    Some(query.to_string())
}

#[cfg(test)]
mod tests {
    use super::{
        normalize_identifier, normalize_operator, normalize_order_expr, normalize_subquery,
    };

    #[test]
    fn identifiers_allow_dotted_names_only() {
        assert_eq!(normalize_identifier(" users.email "), Some("users.email".to_string()));
        assert_eq!(normalize_identifier("email; DROP TABLE users"), None);
        assert_eq!(normalize_identifier("1col"), None);
        assert_eq!(normalize_identifier(""), None);
    }

    #[test]
    fn operators_are_case_and_space_normalized() {
        assert_eq!(normalize_operator(" is   not "), Some("IS NOT"));
        assert_eq!(normalize_operator("like"), Some("LIKE"));
        assert_eq!(normalize_operator("= 1 OR 1 ="), None);
    }

    #[test]
    fn order_expressions_quote_the_column() {
        assert_eq!(
            normalize_order_expr("created_at desc nulls last"),
            Some("\"created_at\" DESC NULLS LAST".to_string())
        );
        assert_eq!(normalize_order_expr("name"), Some("\"name\"".to_string()));
        assert_eq!(normalize_order_expr("name sideways"), None);
        assert_eq!(normalize_order_expr("(SELECT 1)"), None);
    }

    #[test]
    fn subqueries_reject_statement_terminators() {
        assert!(normalize_subquery("SELECT id FROM users").is_some());
        assert!(normalize_subquery("SELECT id FROM users; DELETE FROM users").is_none());
        assert!(normalize_subquery("DELETE FROM users").is_none());
    }
}
