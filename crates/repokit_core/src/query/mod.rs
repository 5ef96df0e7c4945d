//! Minimal parameterised SQL builders and composable criteria.
//!
//! # Responsibility
//! - Build SELECT/INSERT/UPDATE/DELETE statements for one model table.
//! - Expose criteria closures that callers and scopes apply to builders.
//! - Validate every caller-supplied identifier and operator.
//!
//! # Invariants
//! - Predicates are ANDed; values are always bound as parameters.
//! - An invalid fragment poisons the builder; building it then fails with a
//!   syntax-category error instead of running a weakened statement.
//! - Soft-deleted rows are excluded unless a criterion widens the filter.
//!
//! # See also
//! - `query::safety` for the accepted fragment grammar.

mod delete;
mod insert;
mod safety;
mod select;
mod update;

use crate::error::DatabaseError;
use crate::model::Value;
use safety::{normalize_identifier, normalize_operator, normalize_subquery, quote_identifier};
use std::sync::Arc;

pub use delete::{
    delete_by, delete_by_id, delete_column_in, delete_for_real, delete_is_null,
    delete_match_nothing, DeleteQuery,
};
pub use insert::{
    insert_on_conflict_ignore, insert_on_conflict_update, insert_return_order_by_id,
    insert_set_column, InsertQuery, OnConflict,
};
pub use select::{
    exclude_columns, match_nothing, order_by, select_between, select_by, select_by_id,
    select_column_in, select_column_in_subquery, select_column_not_in, select_columns,
    select_deleted_also, select_deleted_only, select_is_null, select_like, select_not_null,
    select_order_asc, select_order_desc, select_paginate, SelectQuery,
};
pub use update::{
    update_by, update_by_id, update_columns, update_deleted_also, update_deleted_only,
    update_exclude_columns, update_is_null, update_match_nothing, update_return_order_by_id,
    update_set_column, UpdateQuery,
};

pub type SelectCriteria = Arc<dyn Fn(&mut SelectQuery) + Send + Sync>;
pub type UpdateCriteria = Arc<dyn Fn(&mut UpdateQuery) + Send + Sync>;
pub type InsertCriteria = Arc<dyn Fn(&mut InsertQuery) + Send + Sync>;
pub type DeleteCriteria = Arc<dyn Fn(&mut DeleteQuery) + Send + Sync>;

/// Statement text plus positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub args: Vec<Value>,
}

/// How soft-deleted rows are treated by reads and updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletedFilter {
    #[default]
    Exclude,
    Include,
    Only,
}

impl DeletedFilter {
    fn predicate(self, column: &str) -> Option<String> {
        let column = quote_identifier(column);
        match self {
            Self::Exclude => Some(format!("{column} IS NULL")),
            Self::Only => Some(format!("{column} IS NOT NULL")),
            Self::Include => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Predicate {
    sql: String,
    args: Vec<Value>,
}

/// ANDed predicate list shared by select, update and delete builders.
#[derive(Debug, Clone, Default)]
pub struct WhereClause {
    predicates: Vec<Predicate>,
    error: Option<String>,
}

impl WhereClause {
    /// `column <operator> ?`
    pub fn compare(&mut self, column: &str, operator: &str, value: impl Into<Value>) {
        let Some(column) = self.column(column) else {
            return;
        };
        let Some(operator) = normalize_operator(operator) else {
            self.fail(format!("invalid comparison operator `{}`", operator.trim()));
            return;
        };
        self.push(format!("{column} {operator} ?"), vec![value.into()]);
    }

    pub fn is_null(&mut self, column: &str) {
        if let Some(column) = self.column(column) {
            self.push(format!("{column} IS NULL"), Vec::new());
        }
    }

    pub fn not_null(&mut self, column: &str) {
        if let Some(column) = self.column(column) {
            self.push(format!("{column} IS NOT NULL"), Vec::new());
        }
    }

    /// `column IN (...)`; an empty list matches nothing.
    pub fn column_in(&mut self, column: &str, values: Vec<Value>) {
        let Some(column) = self.column(column) else {
            return;
        };
        if values.is_empty() {
            self.match_nothing();
            return;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.push(format!("{column} IN ({placeholders})"), values);
    }

    /// `column NOT IN (...)`; an empty list filters nothing out.
    pub fn column_not_in(&mut self, column: &str, values: Vec<Value>) {
        let Some(column) = self.column(column) else {
            return;
        };
        if values.is_empty() {
            return;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.push(format!("{column} NOT IN ({placeholders})"), values);
    }

    pub fn column_in_subquery(&mut self, column: &str, query: &str, args: Vec<Value>) {
        let Some(column) = self.column(column) else {
            return;
        };
        match normalize_subquery(query) {
            Some(query) => self.push(format!("{column} IN ({query})"), args),
            None => self.fail("subquery must be a single SELECT statement"),
        }
    }

    pub fn between(&mut self, column: &str, start: impl Into<Value>, end: impl Into<Value>) {
        if let Some(column) = self.column(column) {
            self.push(
                format!("{column} BETWEEN ? AND ?"),
                vec![start.into(), end.into()],
            );
        }
    }

    pub fn like(&mut self, column: &str, pattern: impl Into<String>) {
        self.compare(column, "LIKE", Value::Text(pattern.into()));
    }

    /// Adds a never-true predicate (fail-closed filtering).
    pub fn match_nothing(&mut self) {
        self.push("1 = 0".to_string(), Vec::new());
    }

    /// Marks the builder invalid; the first failure is reported.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    fn column(&mut self, column: &str) -> Option<String> {
        match normalize_identifier(column) {
            Some(column) => Some(quote_identifier(&column)),
            None => {
                self.fail(format!("invalid column identifier `{}`", column.trim()));
                None
            }
        }
    }

    fn push(&mut self, sql: String, args: Vec<Value>) {
        self.predicates.push(Predicate { sql, args });
    }

    fn check(&self) -> Result<(), DatabaseError> {
        match &self.error {
            Some(message) => Err(DatabaseError::invalid_query(message.clone())),
            None => Ok(()),
        }
    }

    /// Appends ` WHERE ...` with `extra` predicates after the caller's.
    fn render(&self, extra: &[String], sql: &mut String, args: &mut Vec<Value>) {
        let mut parts: Vec<String> = Vec::with_capacity(self.predicates.len() + extra.len());
        for predicate in &self.predicates {
            parts.push(format!("({})", predicate.sql));
            args.extend(predicate.args.iter().cloned());
        }
        parts.extend(extra.iter().map(|predicate| format!("({predicate})")));
        if !parts.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&parts.join(" AND "));
        }
    }
}

/// Validates a list of column names, recording the first bad one.
fn validated_columns(columns: &[&str], error: &mut Option<String>) -> Vec<String> {
    let mut valid = Vec::with_capacity(columns.len());
    for column in columns {
        match normalize_identifier(column) {
            Some(column) => valid.push(column),
            None => {
                if error.is_none() {
                    *error = Some(format!("invalid column identifier `{}`", column.trim()));
                }
            }
        }
    }
    valid
}

fn check_error(error: &Option<String>) -> Result<(), DatabaseError> {
    match error {
        Some(message) => Err(DatabaseError::invalid_query(message.clone())),
        None => Ok(()),
    }
}

fn quoted_table(table: &str) -> Result<String, DatabaseError> {
    normalize_identifier(table)
        .map(|table| quote_identifier(&table))
        .ok_or_else(|| DatabaseError::invalid_query(format!("invalid table identifier `{table}`")))
}

#[cfg(test)]
mod tests {
    use super::{DeletedFilter, WhereClause};
    use crate::error::ErrorCategory;
    use crate::model::Value;

    #[test]
    fn empty_in_list_matches_nothing() {
        let mut clause = WhereClause::default();
        clause.column_in("id", Vec::new());
        let mut sql = String::from("SELECT 1");
        let mut args = Vec::new();
        clause.render(&[], &mut sql, &mut args);
        assert_eq!(sql, "SELECT 1 WHERE (1 = 0)");
        assert!(args.is_empty());
    }

    #[test]
    fn invalid_operator_poisons_the_clause() {
        let mut clause = WhereClause::default();
        clause.compare("email", "= 'x' OR 1 =", "a");
        let err = clause.check().unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Syntax);
        assert!(clause.is_empty());
    }

    #[test]
    fn predicates_render_in_order_with_extras_last() {
        let mut clause = WhereClause::default();
        clause.compare("age", ">=", 18);
        clause.between("score", 1.5, 9.5);
        let mut sql = String::new();
        let mut args = Vec::new();
        let soft = DeletedFilter::Exclude.predicate("deleted_at").unwrap();
        clause.render(&[soft], &mut sql, &mut args);
        assert_eq!(
            sql,
            " WHERE (\"age\" >= ?) AND (\"score\" BETWEEN ? AND ?) AND (\"deleted_at\" IS NULL)"
        );
        assert_eq!(
            args,
            vec![Value::Int(18), Value::Float(1.5), Value::Float(9.5)]
        );
    }
}
