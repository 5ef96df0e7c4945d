//! Per-call request context.
//!
//! # Responsibility
//! - Carry per-call scope overrides and the scope data side-table.
//! - Carry the deadline/cancellation signal checked before store access and
//!   polled while a statement runs.
//!
//! # Invariants
//! - A `Context` is immutable; every `with_*` call derives a new value.
//! - Scope data never lives in globals or thread-locals, so concurrent calls
//!   cannot observe each other's data.

use crate::scope::ScopeOperation;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::RefUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reason a context refuses further store access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context deadline exceeded")]
    DeadlineExceeded,
    #[error("context cancelled")]
    Cancelled,
}

type ScopeValue = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
struct ScopeOverrides {
    use_defaults: bool,
    all: Vec<String>,
    selects: Vec<String>,
    updates: Vec<String>,
    inserts: Vec<String>,
    deletes: Vec<String>,
    data: BTreeMap<String, ScopeValue>,
}

impl Default for ScopeOverrides {
    fn default() -> Self {
        Self {
            use_defaults: true,
            all: Vec::new(),
            selects: Vec::new(),
            updates: Vec::new(),
            inserts: Vec::new(),
            deletes: Vec::new(),
            data: BTreeMap::new(),
        }
    }
}

impl ScopeOverrides {
    fn list_mut(&mut self, target: ScopeTarget) -> &mut Vec<String> {
        match target {
            ScopeTarget::All => &mut self.all,
            ScopeTarget::Operation(ScopeOperation::Select) => &mut self.selects,
            ScopeTarget::Operation(ScopeOperation::Update) => &mut self.updates,
            ScopeTarget::Operation(ScopeOperation::Insert) => &mut self.inserts,
            ScopeTarget::Operation(ScopeOperation::Delete) => &mut self.deletes,
        }
    }

    fn list(&self, operation: ScopeOperation) -> &[String] {
        match operation {
            ScopeOperation::Select => &self.selects,
            ScopeOperation::Update => &self.updates,
            ScopeOperation::Insert => &self.inserts,
            ScopeOperation::Delete => &self.deletes,
        }
    }
}

#[derive(Clone, Copy)]
enum ScopeTarget {
    All,
    Operation(ScopeOperation),
}

#[derive(Clone, Default)]
struct ContextInner {
    scopes: ScopeOverrides,
    deadline: Option<Instant>,
    cancel_flags: Vec<Arc<AtomicBool>>,
}

/// Immutable per-call context passed to every repository operation.
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<ContextInner>,
}

/// Handle that cancels every context derived from `Context::with_cancel`.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

impl Context {
    /// Empty context: default scopes enabled, no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Adds scope names applied to every operation kind.
    pub fn with_scopes<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with_scope_names(ScopeTarget::All, names)
    }

    pub fn with_select_scopes<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with_scope_names(ScopeTarget::Operation(ScopeOperation::Select), names)
    }

    pub fn with_update_scopes<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with_scope_names(ScopeTarget::Operation(ScopeOperation::Update), names)
    }

    pub fn with_insert_scopes<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with_scope_names(ScopeTarget::Operation(ScopeOperation::Insert), names)
    }

    pub fn with_delete_scopes<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with_scope_names(ScopeTarget::Operation(ScopeOperation::Delete), names)
    }

    /// Stores caller data for scope producers under a trimmed name.
    pub fn with_scope_data<V>(&self, name: &str, value: V) -> Self
    where
        V: Any + Send + Sync,
    {
        let mut inner = (*self.inner).clone();
        inner
            .scopes
            .data
            .insert(name.trim().to_string(), Arc::new(value));
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Returns scope data stored under `name` when it has type `V`.
    pub fn scope_data<V>(&self, name: &str) -> Option<&V>
    where
        V: Any + Send + Sync,
    {
        self.inner
            .scopes
            .data
            .get(name.trim())
            .and_then(|value| value.downcast_ref::<V>())
    }

    pub fn has_scope_data(&self, name: &str) -> bool {
        self.inner.scopes.data.contains_key(name.trim())
    }

    /// Sorted names of every scope data entry.
    pub fn scope_data_keys(&self) -> Vec<String> {
        self.inner.scopes.data.keys().cloned().collect()
    }

    /// Disables repository default scopes for calls using this context.
    pub fn without_default_scopes(&self) -> Self {
        let mut inner = (*self.inner).clone();
        inner.scopes.use_defaults = false;
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn uses_default_scopes(&self) -> bool {
        self.inner.scopes.use_defaults
    }

    /// Context-supplied names for `operation`: the all-operations list first.
    pub fn scope_names(&self, operation: ScopeOperation) -> Vec<String> {
        let scopes = &self.inner.scopes;
        let mut names = scopes.all.clone();
        names.extend(scopes.list(operation).iter().cloned());
        names
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut inner = (*self.inner).clone();
        inner.deadline = Some(match inner.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        Self {
            inner: Arc::new(inner),
        }
    }

    /// A timeout too large to represent as an `Instant` leaves the deadline
    /// unchanged.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// Derives a cancellable context; cancelling a parent still cancels it.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let flag = Arc::new(AtomicBool::new(false));
        let mut inner = (*self.inner).clone();
        inner.cancel_flags.push(Arc::clone(&flag));
        (
            Self {
                inner: Arc::new(inner),
            },
            CancelHandle { flag },
        )
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Fails when the context was cancelled or its deadline passed.
    pub fn check(&self) -> Result<(), ContextError> {
        if self
            .inner
            .cancel_flags
            .iter()
            .any(|flag| flag.load(Ordering::SeqCst))
        {
            return Err(ContextError::Cancelled);
        }
        if self
            .inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            return Err(ContextError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Polled by the store while a statement runs. `None` when nothing can
    /// ever interrupt this context.
    pub(crate) fn interrupt_signal(
        &self,
    ) -> Option<impl FnMut() -> bool + Send + RefUnwindSafe + 'static> {
        let flags = self.inner.cancel_flags.clone();
        let deadline = self.inner.deadline;
        if flags.is_empty() && deadline.is_none() {
            return None;
        }
        Some(move || {
            flags.iter().any(|flag| flag.load(Ordering::SeqCst))
                || deadline.is_some_and(|deadline| Instant::now() >= deadline)
        })
    }

    fn with_scope_names<I, S>(&self, target: ScopeTarget, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = (*self.inner).clone();
        let list = inner.scopes.list_mut(target);
        for name in names {
            let trimmed = name.as_ref().trim();
            if !trimmed.is_empty() && !list.iter().any(|existing| existing == trimmed) {
                list.push(trimmed.to_string());
            }
        }
        Self {
            inner: Arc::new(inner),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scopes = &self.inner.scopes;
        f.debug_struct("Context")
            .field("use_defaults", &scopes.use_defaults)
            .field("all", &scopes.all)
            .field("selects", &scopes.selects)
            .field("updates", &scopes.updates)
            .field("inserts", &scopes.inserts)
            .field("deletes", &scopes.deletes)
            .field("data_keys", &self.scope_data_keys())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}
