//! Generic repository over one record type.
//!
//! # Responsibility
//! - Build scoped statements for every CRUD operation from the record's
//!   field table.
//! - Resolve identity for upsert/get-or-create and recover from lost
//!   insert races.
//! - Report failures through the normalized `RepoError` taxonomy.
//!
//! # Invariants
//! - Scope criteria are applied before caller criteria on every operation.
//! - Every operation checks the caller `Context` before touching the store.
//! - `update` succeeds only when exactly one row was affected.
//! - Unconstrained `delete_where` is refused unless explicitly allowed.
//!
//! # See also
//! - `crate::scope` for scope resolution.
//! - `crate::repo::identity` for lookup order.

use super::handlers::ModelHandlers;
use super::identity::resolve_identifier_options;
use super::options::{ListPagination, RepoOptions};
use super::reorder::reorder_by_id;
use super::scan::{record_values, Executor};
use crate::context::Context;
use crate::db::Database;
use crate::error::{
    map_database_error, DatabaseError, FieldError, RepoError, RepoResult, ValidationError,
};
use crate::mapping::{patch_with, Payload, PatchOptions};
use crate::model::{descriptor_for, DescriptorError, Model, ModelDescriptor, ModelMeta, Value};
use crate::query::{
    select_by, update_columns, BuiltQuery, DeleteCriteria, DeleteQuery, InsertCriteria,
    InsertQuery, SelectCriteria, SelectQuery, UpdateCriteria, UpdateQuery,
};
use crate::scope::{ScopeDefaults, ScopeDefinition, ScopeRegistry};
use chrono::Utc;
use log::{debug, info, warn};
use rusqlite::Connection;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use uuid::Uuid;

/// Repository for records of type `T` stored in `T::table_name()`.
///
/// Every operation exists in two forms: `op` runs on the repository's own
/// connection, `op_tx` runs on a caller-supplied connection or transaction
/// (`rusqlite::Transaction` derefs to `Connection`).
pub struct Repository<T: Model> {
    db: Database,
    handlers: ModelHandlers<T>,
    descriptor: Arc<ModelDescriptor<T>>,
    primary_key: String,
    soft_delete: Option<String>,
    scopes: ScopeRegistry,
    list_pagination: RwLock<Option<ListPagination>>,
    allow_full_table_delete: bool,
}

impl<T: Model> Repository<T> {
    /// Builds a repository after validating handlers and the field table.
    ///
    /// # Errors
    /// - `Validation` when the identifier getters are misconfigured.
    /// - `Descriptor` when the field table is invalid or has no primary key.
    pub fn try_new(db: Database, handlers: ModelHandlers<T>, options: RepoOptions) -> RepoResult<Self> {
        handlers.validate()?;
        let descriptor = descriptor_for::<T>()?;
        let primary_key = descriptor
            .primary_key()
            .map(|field| field.storage_name().to_string())
            .ok_or(DescriptorError::MissingPrimaryKey {
                type_name: descriptor.type_name(),
            })?;
        let soft_delete = descriptor
            .soft_delete()
            .map(|field| field.storage_name().to_string());

        debug!(
            "event=repo_init module=repo status=ok table={} primary_key={} soft_delete={}",
            T::table_name(),
            primary_key,
            soft_delete.as_deref().unwrap_or("none")
        );
        Ok(Self {
            db,
            handlers,
            descriptor,
            primary_key,
            soft_delete,
            scopes: ScopeRegistry::new(),
            list_pagination: RwLock::new(options.list_pagination),
            allow_full_table_delete: options.allow_full_table_delete,
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn handlers(&self) -> &ModelHandlers<T> {
        &self.handlers
    }

    pub fn descriptor(&self) -> &ModelDescriptor<T> {
        &self.descriptor
    }

    pub fn model_meta(&self) -> ModelMeta {
        ModelMeta::from_descriptor(T::table_name(), &self.descriptor)
    }

    /// Re-checks handler configuration.
    pub fn validate(&self) -> RepoResult<()> {
        self.handlers.validate()?;
        Ok(())
    }

    pub fn register_scope(&self, name: &str, definition: ScopeDefinition) {
        self.scopes.register(name, definition);
    }

    /// # Errors
    /// - `Validation` naming every unregistered scope; stored defaults are
    ///   left unchanged.
    pub fn set_scope_defaults(&self, defaults: ScopeDefaults) -> RepoResult<()> {
        self.scopes.set_defaults(defaults)?;
        Ok(())
    }

    pub fn scope_defaults(&self) -> ScopeDefaults {
        self.scopes.defaults()
    }

    pub fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    /// Replaces the default `list` pagination; a non-positive limit disables it.
    pub fn set_default_list_pagination(&self, limit: i64, offset: i64) {
        let mut slot = self
            .list_pagination
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = ListPagination::normalized(limit, offset);
    }

    pub fn default_list_pagination(&self) -> Option<ListPagination> {
        *self
            .list_pagination
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, ctx: &Context) -> RepoResult<()> {
        ctx.check()
            .map_err(|err| RepoError::Database(map_database_error(err, self.db.driver())))
    }

    fn executor<'a>(&self, ctx: &'a Context, conn: &'a Connection) -> Executor<'a> {
        Executor {
            ctx,
            conn,
            driver: self.db.driver(),
            table: T::table_name(),
        }
    }

    fn decode(&self, ctx: &Context, conn: &Connection, query: &BuiltQuery) -> RepoResult<Vec<T>> {
        let new_record = || self.handlers.new_record();
        self.executor(ctx, conn).records(query, &self.descriptor, &new_record)
    }

    fn select_query(&self, ctx: &Context) -> SelectQuery {
        let mut query = SelectQuery::new(
            T::table_name(),
            self.descriptor.storage_columns(),
            self.soft_delete.clone(),
        );
        for criteria in self.scopes.select_criteria(ctx) {
            criteria(&mut query);
        }
        query
    }

    fn update_query(&self, ctx: &Context, record: &T, criteria: &[UpdateCriteria]) -> UpdateQuery {
        let mut query = UpdateQuery::new(
            T::table_name(),
            &self.primary_key,
            Value::Uuid(self.handlers.get_id(record)),
            record_values(&self.descriptor, record),
            self.soft_delete.clone(),
        );
        for scope in self.scopes.update_criteria(ctx) {
            scope(&mut query);
        }
        for criteria in criteria {
            criteria(&mut query);
        }
        query
    }

    fn delete_query(&self, ctx: &Context) -> DeleteQuery {
        let mut query = DeleteQuery::new(T::table_name(), self.soft_delete.clone());
        for criteria in self.scopes.delete_criteria(ctx) {
            criteria(&mut query);
        }
        query
    }

    fn trace<R>(&self, event: &str, started_at: Instant, result: RepoResult<R>) -> RepoResult<R> {
        match &result {
            Ok(_) => debug!(
                "event={} module=repo status=ok table={} duration_ms={}",
                event,
                T::table_name(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => debug!(
                "event={} module=repo status=error table={} error_code={} duration_ms={}",
                event,
                T::table_name(),
                err.category().map_or("repo", |category| category.as_str()),
                started_at.elapsed().as_millis()
            ),
        }
        result
    }

    // ---- reads -------------------------------------------------------------

    /// First row matching scopes and `criteria`.
    ///
    /// # Errors
    /// - `NotFound` when no row matches.
    pub fn get_tx(&self, ctx: &Context, conn: &Connection, criteria: &[SelectCriteria]) -> RepoResult<T> {
        let started_at = Instant::now();
        let result = (|| -> RepoResult<T> {
            self.check(ctx)?;
            let mut query = self.select_query(ctx);
            for criteria in criteria {
                criteria(&mut query);
            }
            query.limit(1);
            let built = query.build()?;
            self.decode(ctx, conn, &built)?
                .into_iter()
                .next()
                .ok_or_else(|| DatabaseError::not_found().into())
        })();
        self.trace("repo_get", started_at, result)
    }

    pub fn get(&self, ctx: &Context, criteria: &[SelectCriteria]) -> RepoResult<T> {
        self.db.with_connection(|conn| self.get_tx(ctx, conn, criteria))
    }

    /// Row with primary key `id`; the key predicate precedes `criteria`.
    pub fn get_by_id_tx(
        &self,
        ctx: &Context,
        conn: &Connection,
        id: Uuid,
        criteria: &[SelectCriteria],
    ) -> RepoResult<T> {
        let mut all: Vec<SelectCriteria> = Vec::with_capacity(criteria.len() + 1);
        all.push(select_by(&self.primary_key, "=", id));
        all.extend(criteria.iter().cloned());
        self.get_tx(ctx, conn, &all)
    }

    pub fn get_by_id(&self, ctx: &Context, id: Uuid, criteria: &[SelectCriteria]) -> RepoResult<T> {
        self.db
            .with_connection(|conn| self.get_by_id_tx(ctx, conn, id, criteria))
    }

    /// Row matching `identifier` through the identifier options in order.
    ///
    /// A miss on one option moves to the next; any other failure stops
    /// the search.
    pub fn get_by_identifier_tx(
        &self,
        ctx: &Context,
        conn: &Connection,
        identifier: &str,
        criteria: &[SelectCriteria],
    ) -> RepoResult<T> {
        let mut last_err: Option<RepoError> = None;
        for option in resolve_identifier_options(&self.handlers, identifier) {
            let mut attempt: Vec<SelectCriteria> = criteria.to_vec();
            attempt.push(select_by(
                &option.column,
                "=",
                option.value.as_str(),
            ));
            match self.get_tx(ctx, conn, &attempt) {
                Ok(record) => return Ok(record),
                Err(err) if err.is_not_found() => last_err = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| DatabaseError::not_found().into()))
    }

    pub fn get_by_identifier(
        &self,
        ctx: &Context,
        identifier: &str,
        criteria: &[SelectCriteria],
    ) -> RepoResult<T> {
        self.db
            .with_connection(|conn| self.get_by_identifier_tx(ctx, conn, identifier, criteria))
    }

    /// Matching rows plus the total match count ignoring limit and offset.
    ///
    /// Default pagination applies first so caller criteria can override it.
    pub fn list_tx(
        &self,
        ctx: &Context,
        conn: &Connection,
        criteria: &[SelectCriteria],
    ) -> RepoResult<(Vec<T>, u64)> {
        let started_at = Instant::now();
        let result = (|| -> RepoResult<(Vec<T>, u64)> {
            self.check(ctx)?;
            let mut query = SelectQuery::new(
                T::table_name(),
                self.descriptor.storage_columns(),
                self.soft_delete.clone(),
            );
            if let Some(pagination) = self.default_list_pagination() {
                query.limit(pagination.limit);
                query.offset(pagination.offset);
            }
            for scope in self.scopes.select_criteria(ctx) {
                scope(&mut query);
            }
            for criteria in criteria {
                criteria(&mut query);
            }

            let records = self.decode(ctx, conn, &query.build()?)?;
            let total = self.executor(ctx, conn).count(&query.build_count()?)?;
            Ok((records, total))
        })();
        self.trace("repo_list", started_at, result)
    }

    pub fn list(&self, ctx: &Context, criteria: &[SelectCriteria]) -> RepoResult<(Vec<T>, u64)> {
        self.db.with_connection(|conn| self.list_tx(ctx, conn, criteria))
    }

    pub fn count_tx(&self, ctx: &Context, conn: &Connection, criteria: &[SelectCriteria]) -> RepoResult<u64> {
        let started_at = Instant::now();
        let result = (|| -> RepoResult<u64> {
            self.check(ctx)?;
            let mut query = self.select_query(ctx);
            for criteria in criteria {
                criteria(&mut query);
            }
            self.executor(ctx, conn).count(&query.build_count()?)
        })();
        self.trace("repo_count", started_at, result)
    }

    pub fn count(&self, ctx: &Context, criteria: &[SelectCriteria]) -> RepoResult<u64> {
        self.db.with_connection(|conn| self.count_tx(ctx, conn, criteria))
    }

    /// Runs caller SQL and decodes the rows. Scopes are not applied.
    pub fn raw_tx(&self, ctx: &Context, conn: &Connection, sql: &str, args: &[Value]) -> RepoResult<Vec<T>> {
        let started_at = Instant::now();
        let result = (|| -> RepoResult<Vec<T>> {
            self.check(ctx)?;
            let built = BuiltQuery {
                sql: sql.to_string(),
                args: args.to_vec(),
            };
            self.decode(ctx, conn, &built)
        })();
        self.trace("repo_raw", started_at, result)
    }

    pub fn raw(&self, ctx: &Context, sql: &str, args: &[Value]) -> RepoResult<Vec<T>> {
        self.db.with_connection(|conn| self.raw_tx(ctx, conn, sql, args))
    }

    // ---- writes ------------------------------------------------------------

    /// Inserts `record`, assigning a fresh key when it has none.
    ///
    /// Returns the stored row; when an ignore-conflict insert stores
    /// nothing, the input (with its assigned key) is returned.
    pub fn create_tx(
        &self,
        ctx: &Context,
        conn: &Connection,
        mut record: T,
        criteria: &[InsertCriteria],
    ) -> RepoResult<T> {
        let started_at = Instant::now();
        let result = (|| -> RepoResult<T> {
            self.check(ctx)?;
            if self.handlers.get_id(&record).is_nil() {
                self.handlers.set_id(&mut record, Uuid::new_v4());
            }
            let (columns, row): (Vec<String>, Vec<Value>) =
                record_values(&self.descriptor, &record).into_iter().unzip();
            let mut query = InsertQuery::new(T::table_name(), &self.primary_key, columns, vec![row]);
            for scope in self.scopes.insert_criteria(ctx) {
                scope(&mut query);
            }
            for criteria in criteria {
                criteria(&mut query);
            }
            let stored = self.decode(ctx, conn, &query.build()?)?;
            Ok(stored.into_iter().next().unwrap_or(record))
        })();
        self.trace("repo_create", started_at, result)
    }

    pub fn create(&self, ctx: &Context, record: T, criteria: &[InsertCriteria]) -> RepoResult<T> {
        self.db
            .with_connection(|conn| self.create_tx(ctx, conn, record, criteria))
    }

    /// Inserts every record in one statement.
    ///
    /// Rows come back in store order unless `insert_return_order_by_id` is
    /// among the criteria; then they follow input order, falling back to
    /// store order when the returned keys cannot be matched one to one.
    pub fn create_many_tx(
        &self,
        ctx: &Context,
        conn: &Connection,
        mut records: Vec<T>,
        criteria: &[InsertCriteria],
    ) -> RepoResult<Vec<T>> {
        let started_at = Instant::now();
        let result = (|| -> RepoResult<Vec<T>> {
            self.check(ctx)?;
            if records.is_empty() {
                return Ok(records);
            }

            let mut order = Vec::with_capacity(records.len());
            let mut columns = Vec::new();
            let mut rows = Vec::with_capacity(records.len());
            for record in &mut records {
                if self.handlers.get_id(record).is_nil() {
                    self.handlers.set_id(record, Uuid::new_v4());
                }
                order.push(self.handlers.get_id(record));
                let (names, row): (Vec<String>, Vec<Value>) =
                    record_values(&self.descriptor, record).into_iter().unzip();
                columns = names;
                rows.push(row);
            }

            let mut query = InsertQuery::new(T::table_name(), &self.primary_key, columns, rows);
            for scope in self.scopes.insert_criteria(ctx) {
                scope(&mut query);
            }
            for criteria in criteria {
                criteria(&mut query);
            }
            let stored = self.decode(ctx, conn, &query.build()?)?;
            if !query.returns_order_by_id() {
                return Ok(stored);
            }
            Ok(self.restore_order(stored, &order, "repo_create_many"))
        })();
        self.trace("repo_create_many", started_at, result)
    }

    pub fn create_many(&self, ctx: &Context, records: Vec<T>, criteria: &[InsertCriteria]) -> RepoResult<Vec<T>> {
        self.db
            .with_connection(|conn| self.create_many_tx(ctx, conn, records, criteria))
    }

    fn restore_order(&self, stored: Vec<T>, order: &[Uuid], event: &str) -> Vec<T> {
        match reorder_by_id(stored, order, |record| self.handlers.get_id(record)) {
            Ok(ordered) => ordered,
            Err(stored) => {
                warn!(
                    "event={} module=repo status=fallback table={} reason=ambiguous_return_order requested={} returned={}",
                    event,
                    T::table_name(),
                    order.len(),
                    stored.len()
                );
                stored
            }
        }
    }

    /// Updates the row keyed by `record`'s primary key.
    ///
    /// # Errors
    /// - `ExpectedCount` when the statement affects anything but one row.
    pub fn update_tx(
        &self,
        ctx: &Context,
        conn: &Connection,
        record: T,
        criteria: &[UpdateCriteria],
    ) -> RepoResult<T> {
        let started_at = Instant::now();
        let result = (|| -> RepoResult<T> {
            self.check(ctx)?;
            let query = self.update_query(ctx, &record, criteria);
            let mut stored = self.decode(ctx, conn, &query.build()?)?;
            if stored.len() != 1 {
                return Err(DatabaseError::expected_count(1, stored.len() as u64).into());
            }
            Ok(stored.remove(0))
        })();
        self.trace("repo_update", started_at, result)
    }

    pub fn update(&self, ctx: &Context, record: T, criteria: &[UpdateCriteria]) -> RepoResult<T> {
        self.db
            .with_connection(|conn| self.update_tx(ctx, conn, record, criteria))
    }

    /// Updates each record by key without a per-row count check.
    ///
    /// Records matching no row are absent from the result.
    /// `update_return_order_by_id` restores input order.
    pub fn update_many_tx(
        &self,
        ctx: &Context,
        conn: &Connection,
        records: Vec<T>,
        criteria: &[UpdateCriteria],
    ) -> RepoResult<Vec<T>> {
        let started_at = Instant::now();
        let result = (|| -> RepoResult<Vec<T>> {
            self.check(ctx)?;
            let mut order = Vec::with_capacity(records.len());
            let mut preserve_order = false;
            let mut stored = Vec::with_capacity(records.len());
            for record in &records {
                let query = self.update_query(ctx, record, criteria);
                preserve_order |= query.returns_order_by_id();
                order.push(self.handlers.get_id(record));
                stored.extend(self.decode(ctx, conn, &query.build()?)?);
            }
            if !preserve_order {
                return Ok(stored);
            }
            Ok(self.restore_order(stored, &order, "repo_update_many"))
        })();
        self.trace("repo_update_many", started_at, result)
    }

    pub fn update_many(&self, ctx: &Context, records: Vec<T>, criteria: &[UpdateCriteria]) -> RepoResult<Vec<T>> {
        self.db
            .with_connection(|conn| self.update_many_tx(ctx, conn, records, criteria))
    }

    /// Creates when the insert wins, or returns the row a concurrent writer
    /// stored first.
    fn create_or_recover(&self, ctx: &Context, conn: &Connection, record: T, event: &str) -> RepoResult<T> {
        let fallback = record.clone();
        match self.create_tx(ctx, conn, record, &[]) {
            Ok(created) => Ok(created),
            Err(err) if err.is_duplicate() => {
                match self.find_existing_tx(ctx, conn, &fallback)? {
                    Some(winner) => {
                        info!(
                            "event={} module=repo status=recovered table={} reason=duplicate_insert",
                            event,
                            T::table_name()
                        );
                        Ok(winner)
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Updates the existing row `record` resolves to, or creates it.
    ///
    /// On update the record takes the existing row's key. A create that
    /// loses a race to a concurrent insert returns the winner's row.
    pub fn upsert_tx(
        &self,
        ctx: &Context,
        conn: &Connection,
        mut record: T,
        criteria: &[UpdateCriteria],
    ) -> RepoResult<T> {
        self.check(ctx)?;
        match self.find_existing_tx(ctx, conn, &record)? {
            Some(existing) => {
                let id = self.handlers.get_id(&existing);
                self.handlers.set_id(&mut record, id);
                self.update_tx(ctx, conn, record, criteria)
            }
            None => self.create_or_recover(ctx, conn, record, "repo_upsert"),
        }
    }

    pub fn upsert(&self, ctx: &Context, record: T, criteria: &[UpdateCriteria]) -> RepoResult<T> {
        self.db
            .with_connection(|conn| self.upsert_tx(ctx, conn, record, criteria))
    }

    /// Upserts each record in order; stops at the first failure.
    pub fn upsert_many_tx(
        &self,
        ctx: &Context,
        conn: &Connection,
        records: Vec<T>,
        criteria: &[UpdateCriteria],
    ) -> RepoResult<Vec<T>> {
        records
            .into_iter()
            .map(|record| self.upsert_tx(ctx, conn, record, criteria))
            .collect()
    }

    pub fn upsert_many(&self, ctx: &Context, records: Vec<T>, criteria: &[UpdateCriteria]) -> RepoResult<Vec<T>> {
        self.db
            .with_connection(|conn| self.upsert_many_tx(ctx, conn, records, criteria))
    }

    /// Returns the existing row `record` resolves to, creating it if absent.
    pub fn get_or_create_tx(&self, ctx: &Context, conn: &Connection, record: T) -> RepoResult<T> {
        self.check(ctx)?;
        match self.find_existing_tx(ctx, conn, &record)? {
            Some(existing) => Ok(existing),
            None => self.create_or_recover(ctx, conn, record, "repo_get_or_create"),
        }
    }

    pub fn get_or_create(&self, ctx: &Context, record: T) -> RepoResult<T> {
        self.db
            .with_connection(|conn| self.get_or_create_tx(ctx, conn, record))
    }

    /// Loads the row by `id`, applies `payload` and persists only the
    /// touched columns. The primary key is never patchable.
    ///
    /// An empty patch returns the current row without writing.
    pub fn patch_by_id_tx(
        &self,
        ctx: &Context,
        conn: &Connection,
        id: Uuid,
        payload: &Payload,
        options: &PatchOptions,
        criteria: &[UpdateCriteria],
    ) -> RepoResult<T> {
        let current = self.get_by_id_tx(ctx, conn, id, &[])?;
        let options = options.clone().deny_primary_key();
        let mut patched = current.clone();
        let touched = patch_with(&self.descriptor, &mut patched, payload, &options)?;
        if touched.is_empty() {
            return Ok(current);
        }

        let touched: Vec<&str> = touched.iter().map(String::as_str).collect();
        let mut all: Vec<UpdateCriteria> = criteria.to_vec();
        all.push(update_columns(&touched));
        self.update_tx(ctx, conn, patched, &all)
    }

    pub fn patch_by_id(
        &self,
        ctx: &Context,
        id: Uuid,
        payload: &Payload,
        options: &PatchOptions,
        criteria: &[UpdateCriteria],
    ) -> RepoResult<T> {
        self.db.with_connection(|conn| {
            self.patch_by_id_tx(ctx, conn, id, payload, options, criteria)
        })
    }

    // ---- deletes -----------------------------------------------------------

    fn delete_record(&self, ctx: &Context, conn: &Connection, record: &T, force: bool) -> RepoResult<()> {
        self.check(ctx)?;
        let mut query = self.delete_query(ctx);
        query
            .where_clause()
            .compare(&self.primary_key, "=", self.handlers.get_id(record));
        if force {
            query.force();
        }
        let built = query.build(Value::Timestamp(Utc::now()))?;
        self.executor(ctx, conn).execute(&built)?;
        Ok(())
    }

    /// Deletes `record` by key; soft-deletes when the model has a
    /// soft-delete column.
    pub fn delete_tx(&self, ctx: &Context, conn: &Connection, record: &T) -> RepoResult<()> {
        let started_at = Instant::now();
        let result = self.delete_record(ctx, conn, record, false);
        self.trace("repo_delete", started_at, result)
    }

    pub fn delete(&self, ctx: &Context, record: &T) -> RepoResult<()> {
        self.db.with_connection(|conn| self.delete_tx(ctx, conn, record))
    }

    /// Removes the row even when the model soft-deletes.
    pub fn force_delete_tx(&self, ctx: &Context, conn: &Connection, record: &T) -> RepoResult<()> {
        let started_at = Instant::now();
        let result = self.delete_record(ctx, conn, record, true);
        self.trace("repo_force_delete", started_at, result)
    }

    pub fn force_delete(&self, ctx: &Context, record: &T) -> RepoResult<()> {
        self.db
            .with_connection(|conn| self.force_delete_tx(ctx, conn, record))
    }

    /// Deletes every row matching scopes and `criteria`; returns the
    /// affected count.
    ///
    /// # Errors
    /// - `Validation` when the statement would carry no predicate and the
    ///   repository does not allow full-table deletes.
    pub fn delete_where_tx(
        &self,
        ctx: &Context,
        conn: &Connection,
        criteria: &[DeleteCriteria],
    ) -> RepoResult<u64> {
        let started_at = Instant::now();
        let result = (|| -> RepoResult<u64> {
            self.check(ctx)?;
            let mut query = self.delete_query(ctx);
            for criteria in criteria {
                criteria(&mut query);
            }
            if !query.has_predicates() && !self.allow_full_table_delete {
                return Err(ValidationError::new(
                    "delete requires criteria",
                    vec![FieldError::new(
                        "criteria",
                        "full-table delete is disabled; pass criteria or enable allow_full_table_delete",
                    )],
                )
                .into());
            }
            let built = query.build(Value::Timestamp(Utc::now()))?;
            Ok(self.executor(ctx, conn).execute(&built)? as u64)
        })();
        self.trace("repo_delete_where", started_at, result)
    }

    pub fn delete_where(&self, ctx: &Context, criteria: &[DeleteCriteria]) -> RepoResult<u64> {
        self.db
            .with_connection(|conn| self.delete_where_tx(ctx, conn, criteria))
    }

    /// Same guard and semantics as `delete_where`.
    pub fn delete_many_tx(&self, ctx: &Context, conn: &Connection, criteria: &[DeleteCriteria]) -> RepoResult<u64> {
        self.delete_where_tx(ctx, conn, criteria)
    }

    pub fn delete_many(&self, ctx: &Context, criteria: &[DeleteCriteria]) -> RepoResult<u64> {
        self.delete_where(ctx, criteria)
    }
}

impl<T: Model> Debug for Repository<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("table", &T::table_name())
            .field("primary_key", &self.primary_key)
            .field("soft_delete", &self.soft_delete)
            .field("handlers", &self.handlers)
            .field("list_pagination", &self.default_list_pagination())
            .field("allow_full_table_delete", &self.allow_full_table_delete)
            .finish()
    }
}
