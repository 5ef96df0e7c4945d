//! Per-record capability bundle used by `Repository`.

use crate::context::Context;
use crate::error::{FieldError, ValidationError};
use crate::query::SelectCriteria;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// One `{column, value}` attempt tried by `get_by_identifier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierOption {
    pub column: String,
    pub value: String,
}

impl IdentifierOption {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Maps a caller identifier to ordered lookup attempts.
pub type IdentifierResolver = Arc<dyn Fn(&str) -> Vec<IdentifierOption> + Send + Sync>;

/// Builds lookup criteria from a record when it has neither key nor identifier.
pub type LookupResolver<T> = Arc<dyn Fn(&Context, &T) -> Vec<SelectCriteria> + Send + Sync>;

/// Capabilities the repository needs but cannot derive from the field table.
///
/// The identifier column and identifier value getters are configured
/// together; `validate` rejects a bundle with only one of them.
pub struct ModelHandlers<T> {
    new_record: Arc<dyn Fn() -> T + Send + Sync>,
    get_id: Arc<dyn Fn(&T) -> Uuid + Send + Sync>,
    set_id: Arc<dyn Fn(&mut T, Uuid) + Send + Sync>,
    identifier_column: Option<Arc<dyn Fn() -> String + Send + Sync>>,
    identifier_value: Option<Arc<dyn Fn(&T) -> String + Send + Sync>>,
    identifier_resolver: Option<IdentifierResolver>,
    lookup_resolver: Option<LookupResolver<T>>,
}

impl<T> Clone for ModelHandlers<T> {
    fn clone(&self) -> Self {
        Self {
            new_record: Arc::clone(&self.new_record),
            get_id: Arc::clone(&self.get_id),
            set_id: Arc::clone(&self.set_id),
            identifier_column: self.identifier_column.clone(),
            identifier_value: self.identifier_value.clone(),
            identifier_resolver: self.identifier_resolver.clone(),
            lookup_resolver: self.lookup_resolver.clone(),
        }
    }
}

impl<T> ModelHandlers<T> {
    pub fn new<N, G, S>(new_record: N, get_id: G, set_id: S) -> Self
    where
        N: Fn() -> T + Send + Sync + 'static,
        G: Fn(&T) -> Uuid + Send + Sync + 'static,
        S: Fn(&mut T, Uuid) + Send + Sync + 'static,
    {
        Self {
            new_record: Arc::new(new_record),
            get_id: Arc::new(get_id),
            set_id: Arc::new(set_id),
            identifier_column: None,
            identifier_value: None,
            identifier_resolver: None,
            lookup_resolver: None,
        }
    }

    /// Configures the unique identifier column and how to read it.
    pub fn with_identifier<V>(self, column: &str, value: V) -> Self
    where
        V: Fn(&T) -> String + Send + Sync + 'static,
    {
        let column = column.to_string();
        self.with_identifier_column(move || column.clone())
            .with_identifier_value(value)
    }

    pub fn with_identifier_column<C>(mut self, column: C) -> Self
    where
        C: Fn() -> String + Send + Sync + 'static,
    {
        self.identifier_column = Some(Arc::new(column));
        self
    }

    /// Reads the identifier value; a blank result means "not available".
    pub fn with_identifier_value<V>(mut self, value: V) -> Self
    where
        V: Fn(&T) -> String + Send + Sync + 'static,
    {
        self.identifier_value = Some(Arc::new(value));
        self
    }

    pub fn with_identifier_resolver<R>(mut self, resolver: R) -> Self
    where
        R: Fn(&str) -> Vec<IdentifierOption> + Send + Sync + 'static,
    {
        self.identifier_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_lookup_resolver<L>(mut self, resolver: L) -> Self
    where
        L: Fn(&Context, &T) -> Vec<SelectCriteria> + Send + Sync + 'static,
    {
        self.lookup_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn new_record(&self) -> T {
        (self.new_record)()
    }

    pub fn get_id(&self, record: &T) -> Uuid {
        (self.get_id)(record)
    }

    pub fn set_id(&self, record: &mut T, id: Uuid) {
        (self.set_id)(record, id)
    }

    /// Trimmed identifier column, `None` when unset or blank.
    pub fn identifier_column(&self) -> Option<String> {
        let column = self.identifier_column.as_ref()?;
        let column = column().trim().to_string();
        (!column.is_empty()).then_some(column)
    }

    /// Trimmed identifier value, `None` when unset or blank.
    pub fn identifier_value(&self, record: &T) -> Option<String> {
        let value = self.identifier_value.as_ref()?;
        let value = value(record).trim().to_string();
        (!value.is_empty()).then_some(value)
    }

    pub fn resolve_identifier(&self, identifier: &str) -> Option<Vec<IdentifierOption>> {
        self.identifier_resolver
            .as_ref()
            .map(|resolver| resolver(identifier))
    }

    pub fn lookup_criteria(&self, ctx: &Context, record: &T) -> Option<Vec<SelectCriteria>> {
        self.lookup_resolver
            .as_ref()
            .map(|resolver| resolver(ctx, record))
    }

    /// Checks the identifier getter pairing.
    ///
    /// # Errors
    /// - `handlers`: only one of the two identifier getters is configured.
    /// - `handlers.get_identifier`: the column getter returns a blank name.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut fields = Vec::new();
        match (&self.identifier_column, &self.identifier_value) {
            (Some(column), Some(_)) => {
                if column().trim().is_empty() {
                    fields.push(FieldError::new(
                        "handlers.get_identifier",
                        "must return a non-empty column name",
                    ));
                }
            }
            (None, None) => {}
            _ => fields.push(FieldError::new(
                "handlers",
                "identifier getters must both be provided or both omitted",
            )),
        }

        if fields.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new("repository configuration invalid", fields))
        }
    }
}

impl<T> Debug for ModelHandlers<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandlers")
            .field("identifier_column", &self.identifier_column())
            .field("has_identifier_value", &self.identifier_value.is_some())
            .field("has_identifier_resolver", &self.identifier_resolver.is_some())
            .field("has_lookup_resolver", &self.lookup_resolver.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::ModelHandlers;
    use uuid::Uuid;

    #[derive(Debug, Clone, Default)]
    struct Row {
        id: Uuid,
        slug: String,
    }

    fn base() -> ModelHandlers<Row> {
        ModelHandlers::new(Row::default, |row: &Row| row.id, |row: &mut Row, id| row.id = id)
    }

    #[test]
    fn half_configured_identifier_is_rejected() {
        let err = base()
            .with_identifier_value(|row: &Row| row.slug.clone())
            .validate()
            .unwrap_err();
        assert_eq!(err.fields.len(), 1);
        assert_eq!(err.fields[0].field, "handlers");
    }

    #[test]
    fn blank_identifier_column_is_rejected() {
        let err = base()
            .with_identifier("  ", |row: &Row| row.slug.clone())
            .validate()
            .unwrap_err();
        assert_eq!(err.fields[0].field, "handlers.get_identifier");
    }

    #[test]
    fn blank_identifier_values_read_as_missing() {
        let handlers = base().with_identifier("slug", |row: &Row| row.slug.clone());
        assert!(handlers.validate().is_ok());
        let row = Row {
            slug: "  ".to_string(),
            ..Row::default()
        };
        assert_eq!(handlers.identifier_value(&row), None);
        assert_eq!(handlers.identifier_column().as_deref(), Some("slug"));
    }
}
