//! Batched INSERT builder and insert criteria helpers.

use super::safety::{normalize_identifier, quote_identifier};
use super::{check_error, quoted_table, validated_columns, BuiltQuery, InsertCriteria};
use crate::error::DatabaseError;
use crate::model::Value;
use std::sync::Arc;

/// Conflict handling appended to the insert.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OnConflict {
    #[default]
    Abort,
    Ignore,
    /// Update every non-target, non-key column from the proposed row.
    Update(Vec<String>),
}

/// Multi-row insert; every row carries one value per column.
#[derive(Debug, Clone)]
pub struct InsertQuery {
    table: String,
    primary_key: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    on_conflict: OnConflict,
    return_order_by_id: bool,
    error: Option<String>,
}

impl InsertQuery {
    pub fn new(
        table: &str,
        primary_key: &str,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    ) -> Self {
        Self {
            table: table.to_string(),
            primary_key: primary_key.to_string(),
            columns,
            rows,
            on_conflict: OnConflict::default(),
            return_order_by_id: false,
            error: None,
        }
    }

    /// Forces `column` to `value` in every row, adding the column if absent.
    pub fn set_column(&mut self, column: &str, value: impl Into<Value>) {
        let Some(column) = normalize_identifier(column) else {
            if self.error.is_none() {
                self.error = Some(format!("invalid column identifier `{}`", column.trim()));
            }
            return;
        };
        let value = value.into();
        match self.columns.iter().position(|existing| *existing == column) {
            Some(index) => {
                for row in &mut self.rows {
                    if let Some(cell) = row.get_mut(index) {
                        *cell = value.clone();
                    }
                }
            }
            None => {
                self.columns.push(column);
                for row in &mut self.rows {
                    row.push(value.clone());
                }
            }
        }
    }

    pub fn on_conflict(&mut self, behaviour: OnConflict) {
        self.on_conflict = behaviour;
    }

    pub fn mark_return_order_by_id(&mut self) {
        self.return_order_by_id = true;
    }

    pub fn returns_order_by_id(&self) -> bool {
        self.return_order_by_id
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn build(&self) -> Result<BuiltQuery, DatabaseError> {
        check_error(&self.error)?;
        let table = quoted_table(&self.table)?;
        if self.rows.is_empty() || self.columns.is_empty() {
            return Err(DatabaseError::invalid_query("insert has no rows"));
        }
        if self.rows.iter().any(|row| row.len() != self.columns.len()) {
            return Err(DatabaseError::invalid_query(
                "insert row width does not match column list",
            ));
        }

        let columns = self
            .columns
            .iter()
            .map(|column| quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = format!("({})", vec!["?"; self.columns.len()].join(", "));
        let values = vec![placeholders; self.rows.len()].join(", ");

        let mut sql = format!("INSERT INTO {table} ({columns}) VALUES {values}");
        match &self.on_conflict {
            OnConflict::Abort => {}
            OnConflict::Ignore => sql.push_str(" ON CONFLICT DO NOTHING"),
            OnConflict::Update(targets) => {
                let mut error = None;
                let targets = validated_columns(
                    &targets.iter().map(String::as_str).collect::<Vec<_>>(),
                    &mut error,
                );
                check_error(&error)?;
                if targets.is_empty() {
                    return Err(DatabaseError::invalid_query(
                        "conflict update needs at least one target column",
                    ));
                }
                let updates: Vec<String> = self
                    .columns
                    .iter()
                    .filter(|column| **column != self.primary_key && !targets.contains(*column))
                    .map(|column| {
                        let column = quote_identifier(column);
                        format!("{column} = excluded.{column}")
                    })
                    .collect();
                let targets = targets
                    .iter()
                    .map(|column| quote_identifier(column))
                    .collect::<Vec<_>>()
                    .join(", ");
                if updates.is_empty() {
                    sql.push_str(&format!(" ON CONFLICT ({targets}) DO NOTHING"));
                } else {
                    sql.push_str(&format!(
                        " ON CONFLICT ({targets}) DO UPDATE SET {}",
                        updates.join(", ")
                    ));
                }
            }
        }
        sql.push_str(" RETURNING *");

        let args = self.rows.iter().flatten().cloned().collect();
        Ok(BuiltQuery { sql, args })
    }
}

fn criteria<F>(apply: F) -> InsertCriteria
where
    F: Fn(&mut InsertQuery) + Send + Sync + 'static,
{
    Arc::new(apply)
}

pub fn insert_set_column(column: &str, value: impl Into<Value>) -> InsertCriteria {
    let column = column.to_string();
    let value = value.into();
    criteria(move |query| query.set_column(&column, value.clone()))
}

/// `ON CONFLICT DO NOTHING`; conflicting rows are not returned.
pub fn insert_on_conflict_ignore() -> InsertCriteria {
    criteria(|query| query.on_conflict(OnConflict::Ignore))
}

pub fn insert_on_conflict_update(targets: &[&str]) -> InsertCriteria {
    let targets: Vec<String> = targets.iter().map(|column| column.to_string()).collect();
    criteria(move |query| query.on_conflict(OnConflict::Update(targets.clone())))
}

/// Asks `create_many` to return records in input order.
pub fn insert_return_order_by_id() -> InsertCriteria {
    criteria(|query| query.mark_return_order_by_id())
}
