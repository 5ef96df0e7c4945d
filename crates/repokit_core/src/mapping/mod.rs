//! Map projection and map patching for typed records.
//!
//! # Responsibility
//! - Project a record into a `BTreeMap<String, Value>` under a naming strategy.
//! - Apply a partial payload onto a record under a write policy.
//! - Turn a raw storage-keyed payload into update criteria.
//!
//! # Invariants
//! - Payload keys are processed in sorted order.
//! - A failed patch leaves the caller's record untouched.
//! - Touched columns are storage names, each reported once.
//!
//! # See also
//! - `model::descriptor` for the field tables used here.

use crate::model::{
    descriptor_for, CoerceError, DescriptorError, FieldBinding, Fields, ModelDescriptor,
    NamingStrategy, Value,
};
use crate::query::{update_columns, update_set_column, UpdateCriteria};
use std::collections::{BTreeMap, BTreeSet};

/// String-keyed payload exchanged with callers.
pub type Payload = BTreeMap<String, Value>;

/// Patch rejection; each policy failure has its own variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("unknown patch field `{0}`")]
    UnknownField(String),
    #[error("patch field `{0}` is not allowed")]
    FieldNotAllowed(String),
    #[error("patch of primary key field `{0}` is not allowed")]
    PrimaryKeyDenied(String),
    #[error("patch field `{key}` ({column}): {source}")]
    Coerce {
        key: String,
        column: String,
        #[source]
        source: CoerceError,
    },
    #[error("raw column patches require the storage naming strategy, got `{0}`")]
    UnsupportedStrategy(NamingStrategy),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Options for `project`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionOptions {
    pub strategy: NamingStrategy,
    /// Include `None` optionals as explicit `Value::Null`.
    pub include_nulls: bool,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self {
            strategy: NamingStrategy::Storage,
            include_nulls: true,
        }
    }
}

impl ProjectionOptions {
    pub fn strategy(mut self, strategy: NamingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn include_nulls(mut self, include: bool) -> Self {
        self.include_nulls = include;
        self
    }
}

/// Write policy for `apply_map_patch` and friends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchOptions {
    pub strategy: NamingStrategy,
    /// When non-empty, only these names may be written. Entries may be the
    /// payload key or the storage, declared or external name of a field.
    pub allowed: BTreeSet<String>,
    pub ignore_unknown: bool,
    pub ignore_nil: bool,
    pub deny_primary_key: bool,
}

impl PatchOptions {
    pub fn strategy(mut self, strategy: NamingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Adds allow-list entries; blank entries are ignored.
    pub fn allow<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for field in fields {
            let field = field.as_ref().trim();
            if !field.is_empty() {
                self.allowed.insert(field.to_string());
            }
        }
        self
    }

    pub fn ignore_unknown(mut self, ignore: bool) -> Self {
        self.ignore_unknown = ignore;
        self
    }

    pub fn ignore_nil(mut self, ignore: bool) -> Self {
        self.ignore_nil = ignore;
        self
    }

    pub fn deny_primary_key(mut self) -> Self {
        self.deny_primary_key = true;
        self
    }

    fn allows<T>(&self, key: &str, field: &FieldBinding<T>) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        self.allowed.contains(key)
            || self.allowed.contains(field.storage_name())
            || self.allowed.contains(field.declared_name())
            || field
                .external_name()
                .is_some_and(|name| self.allowed.contains(name))
    }
}

/// Projects `record` into a payload map.
pub fn project<T: Fields>(
    record: &T,
    options: &ProjectionOptions,
) -> Result<Payload, DescriptorError> {
    let descriptor = descriptor_for::<T>()?;
    Ok(project_with(&descriptor, record, options))
}

pub(crate) fn project_with<T>(
    descriptor: &ModelDescriptor<T>,
    record: &T,
    options: &ProjectionOptions,
) -> Payload {
    let mut out = Payload::new();
    for field in descriptor.fields() {
        let Some(key) = field.key(options.strategy) else {
            continue;
        };
        let value = field.read(record);
        if value.is_null() && !options.include_nulls {
            continue;
        }
        out.insert(key.to_string(), value);
    }
    out
}

struct PlanItem<'a, T> {
    key: &'a str,
    value: &'a Value,
    field: &'a FieldBinding<T>,
}

fn build_plan<'a, T>(
    descriptor: &'a ModelDescriptor<T>,
    payload: &'a Payload,
    options: &PatchOptions,
) -> Result<Vec<PlanItem<'a, T>>, PatchError> {
    let mut plan = Vec::with_capacity(payload.len());
    for (key, value) in payload {
        if options.ignore_nil && value.is_null() {
            continue;
        }
        let Some(field) = descriptor.lookup(options.strategy, key) else {
            if options.ignore_unknown {
                continue;
            }
            return Err(PatchError::UnknownField(key.clone()));
        };
        if options.deny_primary_key && field.is_primary_key() {
            return Err(PatchError::PrimaryKeyDenied(key.clone()));
        }
        if !options.allows(key, field) {
            return Err(PatchError::FieldNotAllowed(key.clone()));
        }
        plan.push(PlanItem { key, value, field });
    }
    Ok(plan)
}

/// Applies `payload` to a copy of `record`.
///
/// Returns the patched copy plus the touched storage columns. An empty
/// payload returns an unchanged copy and no columns.
///
/// # Errors
/// - Policy violations (`UnknownField`, `FieldNotAllowed`,
///   `PrimaryKeyDenied`) are detected before any field is written.
/// - `Coerce` when a value cannot be converted to the field type.
pub fn apply_map_patch<T: Fields + Clone>(
    record: &T,
    payload: &Payload,
    options: &PatchOptions,
) -> Result<(T, Vec<String>), PatchError> {
    let mut patched = record.clone();
    if payload.is_empty() {
        return Ok((patched, Vec::new()));
    }
    let descriptor = descriptor_for::<T>()?;
    let touched = patch_with(&descriptor, &mut patched, payload, options)?;
    Ok((patched, touched))
}

/// Like `apply_map_patch` but writes into `record` only when every key succeeds.
pub fn apply_map_patch_in_place<T: Fields + Clone>(
    record: &mut T,
    payload: &Payload,
    options: &PatchOptions,
) -> Result<Vec<String>, PatchError> {
    let (patched, touched) = apply_map_patch(record, payload, options)?;
    *record = patched;
    Ok(touched)
}

pub(crate) fn patch_with<T>(
    descriptor: &ModelDescriptor<T>,
    target: &mut T,
    payload: &Payload,
    options: &PatchOptions,
) -> Result<Vec<String>, PatchError> {
    let plan = build_plan(descriptor, payload, options)?;
    let mut touched: Vec<String> = Vec::with_capacity(plan.len());
    for item in plan {
        item.field
            .write(target, item.value.clone())
            .map_err(|source| PatchError::Coerce {
                key: item.key.to_string(),
                column: item.field.storage_name().to_string(),
                source,
            })?;
        let column = item.field.storage_name();
        if !touched.iter().any(|existing| existing == column) {
            touched.push(column.to_string());
        }
    }
    Ok(touched)
}

/// Builds a record from `payload` patched onto `T::default()`.
pub fn map_to_record<T: Fields + Clone + Default>(
    payload: &Payload,
    options: &PatchOptions,
) -> Result<T, PatchError> {
    let (record, _) = apply_map_patch(&T::default(), payload, options)?;
    Ok(record)
}

/// Turns a storage-keyed payload into update criteria without a record.
///
/// Keys are used as column names directly; the output is
/// `update_columns(keys)` followed by one `update_set_column` per key.
/// The primary-key guard matches a key equal to `id` in any case.
pub fn update_criteria_for_map_patch(
    payload: &Payload,
    options: &PatchOptions,
) -> Result<Vec<UpdateCriteria>, PatchError> {
    if options.strategy != NamingStrategy::Storage {
        return Err(PatchError::UnsupportedStrategy(options.strategy));
    }

    let mut columns: Vec<&str> = Vec::with_capacity(payload.len());
    let mut setters: Vec<UpdateCriteria> = Vec::with_capacity(payload.len());
    for (key, value) in payload {
        if options.ignore_nil && value.is_null() {
            continue;
        }
        if options.deny_primary_key && key.eq_ignore_ascii_case("id") {
            return Err(PatchError::PrimaryKeyDenied(key.clone()));
        }
        if !options.allowed.is_empty() && !options.allowed.contains(key) {
            return Err(PatchError::FieldNotAllowed(key.clone()));
        }
        columns.push(key);
        setters.push(update_set_column(key, value.clone()));
    }

    if columns.is_empty() {
        return Ok(Vec::new());
    }
    let mut criteria = Vec::with_capacity(setters.len() + 1);
    criteria.push(update_columns(&columns));
    criteria.extend(setters);
    Ok(criteria)
}

/// Reusable projection and patch option bundle for one record type.
#[derive(Debug, Clone, Default)]
pub struct MapRecordMapper<T> {
    projection: ProjectionOptions,
    patch: PatchOptions,
    _record: std::marker::PhantomData<fn() -> T>,
}

impl<T: Fields + Clone + Default> MapRecordMapper<T> {
    pub fn new(projection: ProjectionOptions, patch: PatchOptions) -> Self {
        Self {
            projection,
            patch,
            _record: std::marker::PhantomData,
        }
    }

    pub fn to_record(&self, payload: &Payload) -> Result<T, PatchError> {
        map_to_record(payload, &self.patch)
    }

    pub fn to_map(&self, record: &T) -> Result<Payload, DescriptorError> {
        project(record, &self.projection)
    }

    pub fn apply_patch(&self, record: &T, payload: &Payload) -> Result<(T, Vec<String>), PatchError> {
        apply_map_patch(record, payload, &self.patch)
    }
}
