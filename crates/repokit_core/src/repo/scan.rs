//! Statement execution and row decoding.
//!
//! Rows are decoded by column name through the record's field table. A
//! column the table does not know, or a value that cannot be coerced into
//! its field, is reported as invalid persisted data rather than skipped.
//!
//! While a statement runs, the call context is polled through a SQLite
//! progress handler; an expired deadline or a cancellation interrupts it and
//! is reported as the context failure, not as a driver error.

use crate::context::Context;
use crate::error::{map_database_error, RepoError, RepoResult};
use crate::model::{ModelDescriptor, Value};
use crate::query::BuiltQuery;
use log::debug;
use rusqlite::{params_from_iter, Connection, ErrorCode};
use std::time::Instant;

/// Virtual machine instructions between two context polls.
const INTERRUPT_POLL_OPS: i32 = 1_000;

pub(crate) struct Executor<'a> {
    pub(crate) ctx: &'a Context,
    pub(crate) conn: &'a Connection,
    pub(crate) driver: &'static str,
    pub(crate) table: &'static str,
}

impl Executor<'_> {
    fn map(&self, err: rusqlite::Error) -> RepoError {
        let interrupted = err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted);
        let mapped = match self.ctx.check() {
            Err(expired) if interrupted => map_database_error(expired, self.driver),
            _ => map_database_error(err, self.driver),
        };
        RepoError::Database(mapped)
    }

    fn interruptible<R>(&self, run: impl FnOnce() -> RepoResult<R>) -> RepoResult<R> {
        let Some(signal) = self.ctx.interrupt_signal() else {
            return run();
        };
        self.conn.progress_handler(INTERRUPT_POLL_OPS, Some(signal));
        let result = run();
        self.conn.progress_handler(0, None::<fn() -> bool>);
        result
    }

    /// Runs `query` and decodes every returned row into a fresh record.
    pub(crate) fn records<T>(
        &self,
        query: &BuiltQuery,
        descriptor: &ModelDescriptor<T>,
        new_record: &dyn Fn() -> T,
    ) -> RepoResult<Vec<T>> {
        self.interruptible(|| self.decode_rows(query, descriptor, new_record))
    }

    fn decode_rows<T>(
        &self,
        query: &BuiltQuery,
        descriptor: &ModelDescriptor<T>,
        new_record: &dyn Fn() -> T,
    ) -> RepoResult<Vec<T>> {
        let started_at = Instant::now();
        let mut stmt = self.conn.prepare(&query.sql).map_err(|err| self.map(err))?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut rows = stmt
            .query(params_from_iter(query.args.iter()))
            .map_err(|err| self.map(err))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().map_err(|err| self.map(err))? {
            let mut record = new_record();
            for (index, column) in columns.iter().enumerate() {
                let Some(field) = descriptor.by_storage(column) else {
                    return Err(RepoError::InvalidData {
                        table: self.table,
                        column: column.clone(),
                        message: "column is not declared by the model".to_string(),
                    });
                };
                let value: Value = row.get(index).map_err(|err| self.map(err))?;
                field
                    .write(&mut record, value)
                    .map_err(|err| RepoError::InvalidData {
                        table: self.table,
                        column: column.clone(),
                        message: err.to_string(),
                    })?;
            }
            records.push(record);
        }

        debug!(
            "event=sql_query module=repo status=ok table={} rows={} duration_ms={}",
            self.table,
            records.len(),
            started_at.elapsed().as_millis()
        );
        Ok(records)
    }

    pub(crate) fn count(&self, query: &BuiltQuery) -> RepoResult<u64> {
        let total: i64 = self.interruptible(|| {
            self.conn
                .query_row(&query.sql, params_from_iter(query.args.iter()), |row| {
                    row.get(0)
                })
                .map_err(|err| self.map(err))
        })?;
        Ok(u64::try_from(total).unwrap_or_default())
    }

    /// Executes a statement that returns no rows; yields the affected count.
    pub(crate) fn execute(&self, query: &BuiltQuery) -> RepoResult<usize> {
        self.interruptible(|| {
            self.conn
                .execute(&query.sql, params_from_iter(query.args.iter()))
                .map_err(|err| self.map(err))
        })
    }
}

/// Storage column values of `record` in field order.
pub(crate) fn record_values<T>(descriptor: &ModelDescriptor<T>, record: &T) -> Vec<(String, Value)> {
    descriptor
        .fields()
        .iter()
        .map(|field| (field.storage_name().to_string(), field.read(record)))
        .collect()
}
