//! DELETE builder and delete criteria helpers.
//!
//! Models with a soft-delete column get an UPDATE stamping that column
//! unless the query is forced.

use super::safety::quote_identifier;
use super::{quoted_table, BuiltQuery, DeleteCriteria, DeletedFilter, WhereClause};
use crate::error::DatabaseError;
use crate::model::Value;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DeleteQuery {
    table: String,
    soft_delete: Option<String>,
    filter: WhereClause,
    force: bool,
}

impl DeleteQuery {
    pub fn new(table: &str, soft_delete: Option<String>) -> Self {
        Self {
            table: table.to_string(),
            soft_delete,
            filter: WhereClause::default(),
            force: false,
        }
    }

    pub fn where_clause(&mut self) -> &mut WhereClause {
        &mut self.filter
    }

    /// Removes rows even when the model soft-deletes.
    pub fn force(&mut self) {
        self.force = true;
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }

    pub fn has_predicates(&self) -> bool {
        !self.filter.is_empty()
    }

    /// Builds the statement; `now` stamps the soft-delete column.
    pub fn build(&self, now: Value) -> Result<BuiltQuery, DatabaseError> {
        self.filter.check()?;
        let table = quoted_table(&self.table)?;
        let mut args = Vec::new();
        let (mut sql, extra) = match self.soft_delete.as_deref() {
            Some(column) if !self.force => {
                args.push(now);
                let extra: Vec<String> = DeletedFilter::Exclude
                    .predicate(column)
                    .into_iter()
                    .collect();
                (
                    format!("UPDATE {table} SET {} = ?", quote_identifier(column)),
                    extra,
                )
            }
            _ => (format!("DELETE FROM {table}"), Vec::new()),
        };
        self.filter.render(&extra, &mut sql, &mut args);
        Ok(BuiltQuery { sql, args })
    }
}

fn criteria<F>(apply: F) -> DeleteCriteria
where
    F: Fn(&mut DeleteQuery) + Send + Sync + 'static,
{
    Arc::new(apply)
}

pub fn delete_by(column: &str, operator: &str, value: impl Into<Value>) -> DeleteCriteria {
    let column = column.to_string();
    let operator = operator.to_string();
    let value = value.into();
    criteria(move |query| {
        query
            .where_clause()
            .compare(&column, &operator, value.clone())
    })
}

pub fn delete_by_id(id: Uuid) -> DeleteCriteria {
    delete_by("id", "=", id)
}

pub fn delete_is_null(column: &str) -> DeleteCriteria {
    let column = column.to_string();
    criteria(move |query| query.where_clause().is_null(&column))
}

pub fn delete_column_in(column: &str, values: Vec<Value>) -> DeleteCriteria {
    let column = column.to_string();
    criteria(move |query| query.where_clause().column_in(&column, values.clone()))
}

/// Hard delete regardless of a soft-delete column.
pub fn delete_for_real() -> DeleteCriteria {
    criteria(|query| query.force())
}

pub fn delete_match_nothing() -> DeleteCriteria {
    criteria(|query| query.where_clause().match_nothing())
}
