//! Named query scopes and per-call scope resolution.
//!
//! # Responsibility
//! - Hold named scope definitions and repository-level scope defaults.
//! - Resolve the ordered, deduplicated scope-name list for one call.
//! - Produce per-operation criteria from the resolved definitions.
//!
//! # Invariants
//! - Default names precede context-supplied names; first occurrence wins.
//! - Every default name resolves to a registered scope when it is stored.
//! - Scope producers run after the registry lock is released.
//!
//! # See also
//! - `context::Context` for per-call overrides and scope data.

use crate::context::Context;
use crate::error::{FieldError, ValidationError};
use crate::model::Value;
use crate::query::{
    delete_by, delete_match_nothing, insert_set_column, match_nothing, select_by, update_by,
    update_match_nothing, DeleteCriteria, InsertCriteria, SelectCriteria, UpdateCriteria,
};
use log::debug;
use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, PoisonError, RwLock};

/// Repository operation kind a scope contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeOperation {
    Select,
    Update,
    Insert,
    Delete,
}

impl ScopeOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Update => "update",
            Self::Insert => "insert",
            Self::Delete => "delete",
        }
    }
}

/// Produces criteria for one operation kind from the call context.
pub type ScopeProducer<C> = Arc<dyn Fn(&Context) -> Vec<C> + Send + Sync>;

/// Up to four criteria producers, one per operation kind.
#[derive(Clone, Default)]
pub struct ScopeDefinition {
    select: Option<ScopeProducer<SelectCriteria>>,
    update: Option<ScopeProducer<UpdateCriteria>>,
    insert: Option<ScopeProducer<InsertCriteria>>,
    delete: Option<ScopeProducer<DeleteCriteria>>,
}

impl ScopeDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_select<F>(mut self, producer: F) -> Self
    where
        F: Fn(&Context) -> Vec<SelectCriteria> + Send + Sync + 'static,
    {
        self.select = Some(Arc::new(producer));
        self
    }

    pub fn on_update<F>(mut self, producer: F) -> Self
    where
        F: Fn(&Context) -> Vec<UpdateCriteria> + Send + Sync + 'static,
    {
        self.update = Some(Arc::new(producer));
        self
    }

    pub fn on_insert<F>(mut self, producer: F) -> Self
    where
        F: Fn(&Context) -> Vec<InsertCriteria> + Send + Sync + 'static,
    {
        self.insert = Some(Arc::new(producer));
        self
    }

    pub fn on_delete<F>(mut self, producer: F) -> Self
    where
        F: Fn(&Context) -> Vec<DeleteCriteria> + Send + Sync + 'static,
    {
        self.delete = Some(Arc::new(producer));
        self
    }

    pub fn applies_to(&self, operation: ScopeOperation) -> bool {
        match operation {
            ScopeOperation::Select => self.select.is_some(),
            ScopeOperation::Update => self.update.is_some(),
            ScopeOperation::Insert => self.insert.is_some(),
            ScopeOperation::Delete => self.delete.is_some(),
        }
    }
}

impl Debug for ScopeDefinition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeDefinition")
            .field("select", &self.select.is_some())
            .field("update", &self.update.is_some())
            .field("insert", &self.insert.is_some())
            .field("delete", &self.delete.is_some())
            .finish()
    }
}

/// Scope names applied by default, per operation kind plus an "all" list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeDefaults {
    pub all: Vec<String>,
    pub select: Vec<String>,
    pub update: Vec<String>,
    pub insert: Vec<String>,
    pub delete: Vec<String>,
}

impl ScopeDefaults {
    fn for_operation(&self, operation: ScopeOperation) -> &[String] {
        match operation {
            ScopeOperation::Select => &self.select,
            ScopeOperation::Update => &self.update,
            ScopeOperation::Insert => &self.insert,
            ScopeOperation::Delete => &self.delete,
        }
    }

    fn all_names(&self) -> impl Iterator<Item = &String> {
        self.all
            .iter()
            .chain(&self.select)
            .chain(&self.update)
            .chain(&self.insert)
            .chain(&self.delete)
    }
}

/// Effective scope configuration for one operation of one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeState {
    pub operation: ScopeOperation,
    pub use_defaults: bool,
    pub names: Vec<String>,
    pub data_keys: Vec<String>,
}

impl ScopeState {
    /// True when nothing beyond the defaults-enabled baseline is configured.
    pub fn is_zero(&self) -> bool {
        self.names.is_empty() && self.data_keys.is_empty() && self.use_defaults
    }
}

/// Computes the ordered scope names for `operation`.
///
/// Order: `defaults.all`, `defaults.<op>` (both skipped when the context
/// disabled defaults), then the context's all-operations list and its
/// per-operation list. Names are trimmed; blanks and repeats are dropped.
pub fn resolve_scope_state(
    ctx: &Context,
    defaults: &ScopeDefaults,
    operation: ScopeOperation,
) -> ScopeState {
    let use_defaults = ctx.uses_default_scopes();
    let mut candidates: Vec<String> = Vec::new();
    if use_defaults {
        candidates.extend(defaults.all.iter().cloned());
        candidates.extend(defaults.for_operation(operation).iter().cloned());
    }
    candidates.extend(ctx.scope_names(operation));

    let mut seen = HashSet::new();
    let names = candidates
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty() && seen.insert(name.clone()))
        .collect();

    ScopeState {
        operation,
        use_defaults,
        names,
        data_keys: ctx.scope_data_keys(),
    }
}

#[derive(Default)]
struct RegistryInner {
    scopes: HashMap<String, ScopeDefinition>,
    defaults: ScopeDefaults,
}

/// Thread-safe store of scope definitions and defaults for one repository.
#[derive(Default)]
pub struct ScopeRegistry {
    inner: RwLock<RegistryInner>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a definition. Blank names are ignored.
    pub fn register(&self, name: &str, definition: ScopeDefinition) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.scopes.insert(name.to_string(), definition);
        debug!("event=scope_register module=scope status=ok name={name}");
    }

    pub fn is_registered(&self, name: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.scopes.contains_key(name.trim())
    }

    /// Replaces the defaults after checking every name is registered.
    ///
    /// # Errors
    /// - Returns a `ValidationError` with one field error per unknown name,
    ///   sorted by name. Stored defaults are unchanged on failure.
    pub fn set_defaults(&self, defaults: ScopeDefaults) -> Result<(), ValidationError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let unknown: BTreeSet<&str> = defaults
            .all_names()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty() && !inner.scopes.contains_key(*name))
            .collect();
        if !unknown.is_empty() {
            let fields = unknown
                .iter()
                .map(|name| {
                    FieldError::new("scope_defaults", format!("scope `{name}` is not registered"))
                })
                .collect();
            return Err(ValidationError::new(
                "scope defaults reference unknown scopes",
                fields,
            ));
        }

        inner.defaults = defaults;
        Ok(())
    }

    pub fn defaults(&self) -> ScopeDefaults {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.defaults.clone()
    }

    pub fn resolve_state(&self, ctx: &Context, operation: ScopeOperation) -> ScopeState {
        let defaults = self.defaults();
        resolve_scope_state(ctx, &defaults, operation)
    }

    /// Drops every definition and default.
    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *inner = RegistryInner::default();
    }

    pub fn select_criteria(&self, ctx: &Context) -> Vec<SelectCriteria> {
        self.definitions(ctx, ScopeOperation::Select)
            .iter()
            .filter_map(|definition| definition.select.as_ref())
            .flat_map(|producer| producer(ctx))
            .collect()
    }

    pub fn update_criteria(&self, ctx: &Context) -> Vec<UpdateCriteria> {
        self.definitions(ctx, ScopeOperation::Update)
            .iter()
            .filter_map(|definition| definition.update.as_ref())
            .flat_map(|producer| producer(ctx))
            .collect()
    }

    pub fn insert_criteria(&self, ctx: &Context) -> Vec<InsertCriteria> {
        self.definitions(ctx, ScopeOperation::Insert)
            .iter()
            .filter_map(|definition| definition.insert.as_ref())
            .flat_map(|producer| producer(ctx))
            .collect()
    }

    pub fn delete_criteria(&self, ctx: &Context) -> Vec<DeleteCriteria> {
        self.definitions(ctx, ScopeOperation::Delete)
            .iter()
            .filter_map(|definition| definition.delete.as_ref())
            .flat_map(|producer| producer(ctx))
            .collect()
    }

    // Only the resolved definitions are cloned under the read lock; producers
    // run after it is released. Unregistered context names are skipped.
    fn definitions(&self, ctx: &Context, operation: ScopeOperation) -> Vec<ScopeDefinition> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        resolve_scope_state(ctx, &inner.defaults, operation)
            .names
            .iter()
            .filter_map(|name| inner.scopes.get(name).cloned())
            .collect()
    }
}

impl Debug for ScopeRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<&String> = inner.scopes.keys().collect();
        names.sort();
        f.debug_struct("ScopeRegistry")
            .field("scopes", &names)
            .field("defaults", &inner.defaults)
            .finish()
    }
}

/// Tenant-style scope keyed on one column.
///
/// Reads, updates and deletes are filtered on `column = <data>`; inserts set
/// `column` to the data. When the context carries no `V` under `data_key`,
/// reads/updates/deletes match nothing and inserts are left untouched.
pub fn scope_by_field<V>(data_key: &str, column: &str) -> ScopeDefinition
where
    V: Clone + Into<Value> + Any + Send + Sync,
{
    let key: Arc<str> = Arc::from(data_key.trim());
    let column: Arc<str> = Arc::from(column.trim());

    let lookup = {
        let key = Arc::clone(&key);
        move |ctx: &Context| -> Option<Value> {
            ctx.scope_data::<V>(&key).cloned().map(|value| value.into())
        }
    };

    let select_lookup = lookup.clone();
    let select_column = Arc::clone(&column);
    let update_lookup = lookup.clone();
    let update_column = Arc::clone(&column);
    let insert_lookup = lookup.clone();
    let insert_column = Arc::clone(&column);
    let delete_lookup = lookup;
    let delete_column = column;

    ScopeDefinition::new()
        .on_select(move |ctx| match select_lookup(ctx) {
            Some(value) => vec![select_by(&select_column, "=", value)],
            None => vec![match_nothing()],
        })
        .on_update(move |ctx| match update_lookup(ctx) {
            Some(value) => vec![update_by(&update_column, "=", value)],
            None => vec![update_match_nothing()],
        })
        .on_insert(move |ctx| match insert_lookup(ctx) {
            Some(value) => vec![insert_set_column(&insert_column, value)],
            None => Vec::new(),
        })
        .on_delete(move |ctx| match delete_lookup(ctx) {
            Some(value) => vec![delete_by(&delete_column, "=", value)],
            None => vec![delete_match_nothing()],
        })
}
