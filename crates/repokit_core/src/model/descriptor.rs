//! Per-type field tables and the process-wide descriptor cache.
//!
//! # Responsibility
//! - Collect persisted fields of a record type from its `Fields::describe`.
//! - Index fields under each naming strategy and reject collisions.
//! - Build each descriptor once per type for the process lifetime.
//!
//! # Invariants
//! - Within one naming strategy no two fields share a key.
//! - Embedding is allowed one level deep; deeper nesting is rejected.
//! - A failed build is never cached; the next call retries it.

use super::value::{CoerceError, FieldType, Value, ValueKind};
use super::Fields;
use log::debug;
use once_cell::sync::Lazy;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError};

/// Which name a payload key is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NamingStrategy {
    /// Storage column name.
    #[default]
    Storage,
    /// External (API payload) name; fields marked `skip_external` are absent.
    External,
    /// Name the field was declared with in `describe`.
    Declared,
}

impl NamingStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::External => "external",
            Self::Declared => "declared",
        }
    }
}

impl Display for NamingStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invalid field table for a record type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("duplicate {strategy} key `{key}` in {type_name} for fields `{first}` and `{second}`")]
    DuplicateKey {
        type_name: &'static str,
        strategy: NamingStrategy,
        key: String,
        first: String,
        second: String,
    },
    #[error("{type_name} embeds fields more than one level deep")]
    NestedEmbedding { type_name: &'static str },
    #[error("{type_name} declares a field with a blank name")]
    BlankName { type_name: &'static str },
    #[error("{type_name} declares more than one primary key (`{first}`, `{second}`)")]
    MultiplePrimaryKeys {
        type_name: &'static str,
        first: String,
        second: String,
    },
    #[error("{type_name} declares more than one soft-delete field (`{first}`, `{second}`)")]
    MultipleSoftDeleteFields {
        type_name: &'static str,
        first: String,
        second: String,
    },
    #[error("{type_name} has no primary key field")]
    MissingPrimaryKey { type_name: &'static str },
}

type Getter<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;
type Setter<T> = Arc<dyn Fn(&mut T, Value) -> Result<(), CoerceError> + Send + Sync>;

/// One persisted field: names, flags and type-erased accessors.
pub struct FieldBinding<T> {
    index: Vec<usize>,
    declared: String,
    storage: String,
    external: Option<String>,
    primary_key: bool,
    unique: bool,
    soft_delete: bool,
    kind: ValueKind,
    nullable: bool,
    get: Getter<T>,
    set: Setter<T>,
}

impl<T> Clone for FieldBinding<T> {
    fn clone(&self) -> Self {
        Self {
            index: self.index.clone(),
            declared: self.declared.clone(),
            storage: self.storage.clone(),
            external: self.external.clone(),
            primary_key: self.primary_key,
            unique: self.unique,
            soft_delete: self.soft_delete,
            kind: self.kind,
            nullable: self.nullable,
            get: Arc::clone(&self.get),
            set: Arc::clone(&self.set),
        }
    }
}

impl<T> std::fmt::Debug for FieldBinding<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldBinding")
            .field("index", &self.index)
            .field("declared", &self.declared)
            .field("storage", &self.storage)
            .field("external", &self.external)
            .field("primary_key", &self.primary_key)
            .field("kind", &self.kind)
            .finish()
    }
}

impl<T> FieldBinding<T> {
    /// Position path: `[outer]` for direct fields, `[outer, inner]` for embedded.
    pub fn index(&self) -> &[usize] {
        &self.index
    }

    pub fn declared_name(&self) -> &str {
        &self.declared
    }

    pub fn storage_name(&self) -> &str {
        &self.storage
    }

    pub fn external_name(&self) -> Option<&str> {
        self.external.as_deref()
    }

    /// Key under `strategy`; `None` when the field is excluded from it.
    pub fn key(&self, strategy: NamingStrategy) -> Option<&str> {
        match strategy {
            NamingStrategy::Storage => Some(&self.storage),
            NamingStrategy::External => self.external.as_deref(),
            NamingStrategy::Declared => Some(&self.declared),
        }
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_unique(&self) -> bool {
        self.unique || self.primary_key
    }

    pub fn is_soft_delete(&self) -> bool {
        self.soft_delete
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn read(&self, record: &T) -> Value {
        (self.get)(record)
    }

    pub fn write(&self, record: &mut T, value: Value) -> Result<(), CoerceError> {
        (self.set)(record, value)
    }
}

/// Builder handed to `Fields::describe`.
pub struct FieldSet<T> {
    fields: Vec<FieldBinding<T>>,
    next_index: usize,
    depth: usize,
    errors: Vec<DescriptorError>,
}

impl<T: 'static> FieldSet<T> {
    fn new(depth: usize) -> Self {
        Self {
            fields: Vec::new(),
            next_index: 0,
            depth,
            errors: Vec::new(),
        }
    }

    /// Declares a persisted field. Storage and external names default to `name`.
    pub fn field<F>(
        &mut self,
        name: &str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> FieldOptions<'_, T>
    where
        F: FieldType,
    {
        let name = name.trim();
        if name.is_empty() {
            self.errors.push(DescriptorError::BlankName {
                type_name: type_name::<T>(),
            });
        }

        let index = vec![self.next_index];
        self.next_index += 1;
        self.fields.push(FieldBinding {
            index,
            declared: name.to_string(),
            storage: name.to_string(),
            external: Some(name.to_string()),
            primary_key: false,
            unique: false,
            soft_delete: false,
            kind: F::KIND,
            nullable: F::NULLABLE,
            get: Arc::new(move |record: &T| get(record).to_value()),
            set: Arc::new(move |record: &mut T, value: Value| {
                *get_mut(record) = F::from_value_or_default(value)?;
                Ok(())
            }),
        });

        let last = self.fields.len() - 1;
        FieldOptions {
            binding: &mut self.fields[last],
        }
    }

    /// Declares the primary-key field.
    pub fn primary_key<F>(
        &mut self,
        name: &str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> FieldOptions<'_, T>
    where
        F: FieldType,
    {
        let options = self.field(name, get, get_mut);
        options.binding.primary_key = true;
        options
    }

    /// Inlines every field of an embedded struct under the same names.
    pub fn embed<E>(&mut self, get: fn(&T) -> &E, get_mut: fn(&mut T) -> &mut E)
    where
        E: Fields,
    {
        let position = self.next_index;
        self.next_index += 1;

        if self.depth > 0 {
            self.errors.push(DescriptorError::NestedEmbedding {
                type_name: type_name::<T>(),
            });
            return;
        }

        let mut nested = FieldSet::<E>::new(self.depth + 1);
        E::describe(&mut nested);
        self.errors.extend(nested.errors);

        for binding in nested.fields {
            let inner_get = binding.get;
            let inner_set = binding.set;
            let mut index = Vec::with_capacity(binding.index.len() + 1);
            index.push(position);
            index.extend(binding.index);

            self.fields.push(FieldBinding {
                index,
                declared: binding.declared,
                storage: binding.storage,
                external: binding.external,
                primary_key: binding.primary_key,
                unique: binding.unique,
                soft_delete: binding.soft_delete,
                kind: binding.kind,
                nullable: binding.nullable,
                get: Arc::new(move |record: &T| inner_get(get(record))),
                set: Arc::new(move |record: &mut T, value: Value| {
                    inner_set(get_mut(record), value)
                }),
            });
        }
    }
}

/// Per-field options chained after `FieldSet::field`.
pub struct FieldOptions<'a, T> {
    binding: &'a mut FieldBinding<T>,
}

impl<T> FieldOptions<'_, T> {
    /// Overrides the storage column name.
    pub fn column(self, name: &str) -> Self {
        let name = name.trim();
        if !name.is_empty() {
            self.binding.storage = name.to_string();
        }
        self
    }

    /// Overrides the external payload name.
    pub fn external(self, name: &str) -> Self {
        let name = name.trim();
        if !name.is_empty() {
            self.binding.external = Some(name.to_string());
        }
        self
    }

    /// Excludes the field from external payloads.
    pub fn skip_external(self) -> Self {
        self.binding.external = None;
        self
    }

    pub fn unique(self) -> Self {
        self.binding.unique = true;
        self
    }

    /// Marks the deletion-timestamp column used for soft deletes.
    pub fn soft_delete(self) -> Self {
        self.binding.soft_delete = true;
        self
    }
}

/// Indexed field table for one record type.
pub struct ModelDescriptor<T> {
    type_name: &'static str,
    fields: Vec<FieldBinding<T>>,
    by_storage: HashMap<String, usize>,
    by_external: HashMap<String, usize>,
    by_declared: HashMap<String, usize>,
    primary_key: Option<usize>,
    soft_delete: Option<usize>,
}

impl<T: Fields> ModelDescriptor<T> {
    /// Builds a descriptor without consulting the cache.
    pub fn build() -> Result<Self, DescriptorError> {
        let type_name = type_name::<T>();
        let mut set = FieldSet::<T>::new(0);
        T::describe(&mut set);
        if let Some(err) = set.errors.into_iter().next() {
            return Err(err);
        }

        let mut descriptor = Self {
            type_name,
            fields: Vec::with_capacity(set.fields.len()),
            by_storage: HashMap::new(),
            by_external: HashMap::new(),
            by_declared: HashMap::new(),
            primary_key: None,
            soft_delete: None,
        };

        for binding in set.fields {
            let position = descriptor.fields.len();
            descriptor.index_key(NamingStrategy::Declared, &binding, position)?;
            descriptor.index_key(NamingStrategy::Storage, &binding, position)?;
            descriptor.index_key(NamingStrategy::External, &binding, position)?;

            if binding.primary_key {
                if let Some(existing) = descriptor.primary_key {
                    return Err(DescriptorError::MultiplePrimaryKeys {
                        type_name,
                        first: descriptor.fields[existing].declared.clone(),
                        second: binding.declared.clone(),
                    });
                }
                descriptor.primary_key = Some(position);
            }
            if binding.soft_delete {
                if let Some(existing) = descriptor.soft_delete {
                    return Err(DescriptorError::MultipleSoftDeleteFields {
                        type_name,
                        first: descriptor.fields[existing].declared.clone(),
                        second: binding.declared.clone(),
                    });
                }
                descriptor.soft_delete = Some(position);
            }
            descriptor.fields.push(binding);
        }

        Ok(descriptor)
    }
}

impl<T> ModelDescriptor<T> {
    fn index_key(
        &mut self,
        strategy: NamingStrategy,
        binding: &FieldBinding<T>,
        position: usize,
    ) -> Result<(), DescriptorError> {
        let Some(key) = binding.key(strategy) else {
            return Ok(());
        };
        let target = match strategy {
            NamingStrategy::Storage => &mut self.by_storage,
            NamingStrategy::External => &mut self.by_external,
            NamingStrategy::Declared => &mut self.by_declared,
        };
        if let Some(existing) = target.get(key) {
            return Err(DescriptorError::DuplicateKey {
                type_name: self.type_name,
                strategy,
                key: key.to_string(),
                first: self.fields[*existing].declared.clone(),
                second: binding.declared.clone(),
            });
        }
        target.insert(key.to_string(), position);
        Ok(())
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Fields in declaration order, embedded fields inlined at their position.
    pub fn fields(&self) -> &[FieldBinding<T>] {
        &self.fields
    }

    pub fn lookup(&self, strategy: NamingStrategy, key: &str) -> Option<&FieldBinding<T>> {
        let table = match strategy {
            NamingStrategy::Storage => &self.by_storage,
            NamingStrategy::External => &self.by_external,
            NamingStrategy::Declared => &self.by_declared,
        };
        table.get(key).map(|position| &self.fields[*position])
    }

    pub fn by_storage(&self, column: &str) -> Option<&FieldBinding<T>> {
        self.lookup(NamingStrategy::Storage, column)
    }

    pub fn primary_key(&self) -> Option<&FieldBinding<T>> {
        self.primary_key.map(|position| &self.fields[position])
    }

    pub fn soft_delete(&self) -> Option<&FieldBinding<T>> {
        self.soft_delete.map(|position| &self.fields[position])
    }

    pub fn storage_columns(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|field| field.storage.clone())
            .collect()
    }
}

static DESCRIPTOR_CACHE: Lazy<Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Returns the cached descriptor for `T`, building it on first use.
///
/// The cache lock is held while building, so `Fields::describe`
/// implementations must not call back into this function.
pub fn descriptor_for<T: Fields>() -> Result<Arc<ModelDescriptor<T>>, DescriptorError> {
    let mut cache = DESCRIPTOR_CACHE
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if let Some(entry) = cache.get(&TypeId::of::<T>()) {
        if let Ok(descriptor) = Arc::clone(entry).downcast::<ModelDescriptor<T>>() {
            return Ok(descriptor);
        }
    }

    let descriptor = Arc::new(ModelDescriptor::<T>::build()?);
    let erased: Arc<dyn Any + Send + Sync> = descriptor.clone();
    cache.insert(TypeId::of::<T>(), erased);
    debug!(
        "event=descriptor_build module=model status=ok type={} fields={}",
        descriptor.type_name,
        descriptor.fields.len()
    );
    Ok(descriptor)
}
