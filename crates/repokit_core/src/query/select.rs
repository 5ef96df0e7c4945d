//! SELECT builder and select criteria helpers.

use super::safety::{normalize_order_expr, quote_identifier};
use super::{
    check_error, quoted_table, validated_columns, BuiltQuery, DeletedFilter, SelectCriteria,
    WhereClause,
};
use crate::error::DatabaseError;
use crate::model::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Select statement for one model table.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    table: String,
    model_columns: Vec<String>,
    soft_delete: Option<String>,
    filter: WhereClause,
    columns: Vec<String>,
    excluded: Vec<String>,
    order: Vec<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    deleted: DeletedFilter,
    error: Option<String>,
}

impl SelectQuery {
    pub fn new(table: &str, model_columns: Vec<String>, soft_delete: Option<String>) -> Self {
        Self {
            table: table.to_string(),
            model_columns,
            soft_delete,
            filter: WhereClause::default(),
            columns: Vec::new(),
            excluded: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            deleted: DeletedFilter::default(),
            error: None,
        }
    }

    pub fn where_clause(&mut self) -> &mut WhereClause {
        &mut self.filter
    }

    /// Restricts the projection to `columns` (appended across calls).
    pub fn columns(&mut self, columns: &[&str]) {
        let columns = validated_columns(columns, &mut self.error);
        self.columns.extend(columns);
    }

    pub fn exclude_columns(&mut self, columns: &[&str]) {
        let columns = validated_columns(columns, &mut self.error);
        self.excluded.extend(columns);
    }

    /// Appends `column [ASC|DESC [NULLS FIRST|LAST]]`.
    pub fn order_by(&mut self, expr: &str) {
        match normalize_order_expr(expr) {
            Some(expr) => self.order.push(expr),
            None => {
                if self.error.is_none() {
                    self.error = Some(format!("invalid order expression `{}`", expr.trim()));
                }
            }
        }
    }

    /// Positive limits apply; zero or negative clears the limit.
    pub fn limit(&mut self, limit: i64) {
        self.limit = (limit > 0).then_some(limit);
    }

    /// Negative offsets are treated as zero.
    pub fn offset(&mut self, offset: i64) {
        self.offset = (offset > 0).then_some(offset);
    }

    pub fn deleted(&mut self, filter: DeletedFilter) {
        self.deleted = filter;
    }

    pub fn current_limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn current_offset(&self) -> Option<i64> {
        self.offset
    }

    pub fn build(&self) -> Result<BuiltQuery, DatabaseError> {
        let (mut sql, mut args) = self.prefix(&self.projection())?;
        if !self.order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                args.push(Value::Int(limit));
                args.push(Value::Int(offset));
            }
            (Some(limit), None) => {
                sql.push_str(" LIMIT ?");
                args.push(Value::Int(limit));
            }
            (None, Some(offset)) => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                args.push(Value::Int(offset));
            }
            (None, None) => {}
        }
        Ok(BuiltQuery { sql, args })
    }

    /// Row count for the same filters, ignoring ordering and pagination.
    pub fn build_count(&self) -> Result<BuiltQuery, DatabaseError> {
        let (sql, args) = self.prefix("COUNT(*)")?;
        Ok(BuiltQuery { sql, args })
    }

    fn projection(&self) -> String {
        let base: Vec<&String> = if self.columns.is_empty() {
            self.model_columns.iter().collect()
        } else {
            self.columns.iter().collect()
        };
        let selected: Vec<String> = base
            .into_iter()
            .filter(|column| !self.excluded.contains(*column))
            .map(|column| quote_identifier(column))
            .collect();
        if selected.is_empty() {
            "*".to_string()
        } else {
            selected.join(", ")
        }
    }

    fn prefix(&self, projection: &str) -> Result<(String, Vec<Value>), DatabaseError> {
        check_error(&self.error)?;
        self.filter.check()?;
        let table = quoted_table(&self.table)?;
        let mut sql = format!("SELECT {projection} FROM {table}");
        let mut args = Vec::new();
        let extra: Vec<String> = self
            .soft_delete
            .as_deref()
            .and_then(|column| self.deleted.predicate(column))
            .into_iter()
            .collect();
        self.filter.render(&extra, &mut sql, &mut args);
        Ok((sql, args))
    }
}

fn criteria<F>(apply: F) -> SelectCriteria
where
    F: Fn(&mut SelectQuery) + Send + Sync + 'static,
{
    Arc::new(apply)
}

/// `column <operator> value`
pub fn select_by(column: &str, operator: &str, value: impl Into<Value>) -> SelectCriteria {
    let column = column.to_string();
    let operator = operator.to_string();
    let value = value.into();
    criteria(move |query| {
        query
            .where_clause()
            .compare(&column, &operator, value.clone())
    })
}

pub fn select_by_id(id: Uuid) -> SelectCriteria {
    select_by("id", "=", id)
}

pub fn select_is_null(column: &str) -> SelectCriteria {
    let column = column.to_string();
    criteria(move |query| query.where_clause().is_null(&column))
}

pub fn select_not_null(column: &str) -> SelectCriteria {
    let column = column.to_string();
    criteria(move |query| query.where_clause().not_null(&column))
}

pub fn select_column_in(column: &str, values: Vec<Value>) -> SelectCriteria {
    let column = column.to_string();
    criteria(move |query| query.where_clause().column_in(&column, values.clone()))
}

pub fn select_column_not_in(column: &str, values: Vec<Value>) -> SelectCriteria {
    let column = column.to_string();
    criteria(move |query| query.where_clause().column_not_in(&column, values.clone()))
}

/// `column IN (<select>)`; the subquery must be one plain SELECT.
pub fn select_column_in_subquery(column: &str, subquery: &str, args: Vec<Value>) -> SelectCriteria {
    let column = column.to_string();
    let subquery = subquery.to_string();
    criteria(move |query| {
        query
            .where_clause()
            .column_in_subquery(&column, &subquery, args.clone())
    })
}

pub fn select_between(
    column: &str,
    start: impl Into<Value>,
    end: impl Into<Value>,
) -> SelectCriteria {
    let column = column.to_string();
    let start = start.into();
    let end = end.into();
    criteria(move |query| {
        query
            .where_clause()
            .between(&column, start.clone(), end.clone())
    })
}

pub fn select_like(column: &str, pattern: &str) -> SelectCriteria {
    let column = column.to_string();
    let pattern = pattern.to_string();
    criteria(move |query| query.where_clause().like(&column, pattern.clone()))
}

pub fn select_paginate(limit: i64, offset: i64) -> SelectCriteria {
    criteria(move |query| {
        query.limit(limit);
        query.offset(offset);
    })
}

pub fn order_by(expr: &str) -> SelectCriteria {
    let expr = expr.to_string();
    criteria(move |query| query.order_by(&expr))
}

pub fn select_order_asc(column: &str) -> SelectCriteria {
    order_by(&format!("{} ASC", column.trim()))
}

pub fn select_order_desc(column: &str) -> SelectCriteria {
    order_by(&format!("{} DESC", column.trim()))
}

pub fn select_columns(columns: &[&str]) -> SelectCriteria {
    let columns: Vec<String> = columns.iter().map(|column| column.to_string()).collect();
    criteria(move |query| {
        let refs: Vec<&str> = columns.iter().map(String::as_str).collect();
        query.columns(&refs);
    })
}

pub fn exclude_columns(columns: &[&str]) -> SelectCriteria {
    let columns: Vec<String> = columns.iter().map(|column| column.to_string()).collect();
    criteria(move |query| {
        let refs: Vec<&str> = columns.iter().map(String::as_str).collect();
        query.exclude_columns(&refs);
    })
}

pub fn select_deleted_also() -> SelectCriteria {
    criteria(|query| query.deleted(DeletedFilter::Include))
}

pub fn select_deleted_only() -> SelectCriteria {
    criteria(|query| query.deleted(DeletedFilter::Only))
}

/// Never-matching filter for fail-closed scopes.
pub fn match_nothing() -> SelectCriteria {
    criteria(|query| query.where_clause().match_nothing())
}
