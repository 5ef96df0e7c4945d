//! UPDATE builder and update criteria helpers.

use super::safety::{normalize_identifier, quote_identifier};
use super::{
    check_error, quoted_table, validated_columns, BuiltQuery, DeletedFilter, UpdateCriteria,
    WhereClause,
};
use crate::error::DatabaseError;
use crate::model::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Primary-key-qualified update of one record.
///
/// The SET list defaults to every model column except the primary key.
/// `columns` narrows it, `exclude_columns` removes from it, and any
/// `set_column` entries replace it entirely.
#[derive(Debug, Clone)]
pub struct UpdateQuery {
    table: String,
    primary_key: String,
    key: Value,
    values: Vec<(String, Value)>,
    soft_delete: Option<String>,
    filter: WhereClause,
    only: Vec<String>,
    excluded: Vec<String>,
    explicit: Vec<(String, Value)>,
    deleted: DeletedFilter,
    return_order_by_id: bool,
    error: Option<String>,
}

impl UpdateQuery {
    pub fn new(
        table: &str,
        primary_key: &str,
        key: Value,
        values: Vec<(String, Value)>,
        soft_delete: Option<String>,
    ) -> Self {
        Self {
            table: table.to_string(),
            primary_key: primary_key.to_string(),
            key,
            values,
            soft_delete,
            filter: WhereClause::default(),
            only: Vec::new(),
            excluded: Vec::new(),
            explicit: Vec::new(),
            deleted: DeletedFilter::default(),
            return_order_by_id: false,
            error: None,
        }
    }

    pub fn where_clause(&mut self) -> &mut WhereClause {
        &mut self.filter
    }

    pub fn columns(&mut self, columns: &[&str]) {
        let columns = validated_columns(columns, &mut self.error);
        self.only.extend(columns);
    }

    pub fn exclude_columns(&mut self, columns: &[&str]) {
        let columns = validated_columns(columns, &mut self.error);
        self.excluded.extend(columns);
    }

    /// Sets `column = value`; a later call for the same column wins.
    pub fn set_column(&mut self, column: &str, value: impl Into<Value>) {
        let Some(column) = normalize_identifier(column) else {
            if self.error.is_none() {
                self.error = Some(format!("invalid column identifier `{}`", column.trim()));
            }
            return;
        };
        let value = value.into();
        match self.explicit.iter_mut().find(|(existing, _)| *existing == column) {
            Some(entry) => entry.1 = value,
            None => self.explicit.push((column, value)),
        }
    }

    pub fn deleted(&mut self, filter: DeletedFilter) {
        self.deleted = filter;
    }

    pub fn mark_return_order_by_id(&mut self) {
        self.return_order_by_id = true;
    }

    pub fn returns_order_by_id(&self) -> bool {
        self.return_order_by_id
    }

    pub fn build(&self) -> Result<BuiltQuery, DatabaseError> {
        check_error(&self.error)?;
        self.filter.check()?;
        let table = quoted_table(&self.table)?;

        let assignments = self.assignments();
        if assignments.is_empty() {
            return Err(DatabaseError::invalid_query("update has no columns to set"));
        }

        let mut args: Vec<Value> = Vec::with_capacity(assignments.len() + 1);
        let set = assignments
            .into_iter()
            .map(|(column, value)| {
                args.push(value);
                format!("{} = ?", quote_identifier(&column))
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut clause = WhereClause::default();
        clause.compare(&self.primary_key, "=", self.key.clone());
        clause.predicates.extend(self.filter.predicates.iter().cloned());
        clause.check()?;

        let mut sql = format!("UPDATE {table} SET {set}");
        let extra: Vec<String> = self
            .soft_delete
            .as_deref()
            .and_then(|column| self.deleted.predicate(column))
            .into_iter()
            .collect();
        clause.render(&extra, &mut sql, &mut args);
        sql.push_str(" RETURNING *");
        Ok(BuiltQuery { sql, args })
    }

    fn assignments(&self) -> Vec<(String, Value)> {
        if !self.explicit.is_empty() {
            return self
                .explicit
                .iter()
                .filter(|(column, _)| !self.excluded.contains(column))
                .cloned()
                .collect();
        }
        self.values
            .iter()
            .filter(|(column, _)| *column != self.primary_key)
            .filter(|(column, _)| self.only.is_empty() || self.only.contains(column))
            .filter(|(column, _)| !self.excluded.contains(column))
            .cloned()
            .collect()
    }
}

fn criteria<F>(apply: F) -> UpdateCriteria
where
    F: Fn(&mut UpdateQuery) + Send + Sync + 'static,
{
    Arc::new(apply)
}

pub fn update_by(column: &str, operator: &str, value: impl Into<Value>) -> UpdateCriteria {
    let column = column.to_string();
    let operator = operator.to_string();
    let value = value.into();
    criteria(move |query| {
        query
            .where_clause()
            .compare(&column, &operator, value.clone())
    })
}

pub fn update_by_id(id: Uuid) -> UpdateCriteria {
    update_by("id", "=", id)
}

pub fn update_is_null(column: &str) -> UpdateCriteria {
    let column = column.to_string();
    criteria(move |query| query.where_clause().is_null(&column))
}

/// Restricts the SET list to `columns`.
pub fn update_columns(columns: &[&str]) -> UpdateCriteria {
    let columns: Vec<String> = columns.iter().map(|column| column.to_string()).collect();
    criteria(move |query| {
        let refs: Vec<&str> = columns.iter().map(String::as_str).collect();
        query.columns(&refs);
    })
}

pub fn update_exclude_columns(columns: &[&str]) -> UpdateCriteria {
    let columns: Vec<String> = columns.iter().map(|column| column.to_string()).collect();
    criteria(move |query| {
        let refs: Vec<&str> = columns.iter().map(String::as_str).collect();
        query.exclude_columns(&refs);
    })
}

pub fn update_set_column(column: &str, value: impl Into<Value>) -> UpdateCriteria {
    let column = column.to_string();
    let value = value.into();
    criteria(move |query| query.set_column(&column, value.clone()))
}

pub fn update_deleted_also() -> UpdateCriteria {
    criteria(|query| query.deleted(DeletedFilter::Include))
}

pub fn update_deleted_only() -> UpdateCriteria {
    criteria(|query| query.deleted(DeletedFilter::Only))
}

/// Asks `update_many` to return records in input order.
pub fn update_return_order_by_id() -> UpdateCriteria {
    criteria(|query| query.mark_return_order_by_id())
}

pub fn update_match_nothing() -> UpdateCriteria {
    criteria(|query| query.where_clause().match_nothing())
}
