//! Identity resolution for upsert and get-or-create.
//!
//! # Invariants
//! - Lookups are read-only and apply select scopes.
//! - "Not found" is an answer here, never an error; every other failure
//!   propagates unchanged.

use super::handlers::{IdentifierOption, ModelHandlers};
use super::repository::Repository;
use crate::context::Context;
use crate::error::RepoResult;
use crate::model::Model;
use rusqlite::Connection;

/// Ordered `{column, value}` attempts for `identifier`.
///
/// A configured resolver wins when it yields at least one usable option
/// (non-blank column; blank values fall back to the trimmed identifier).
/// Otherwise the configured identifier column, or `id`, is tried once.
pub(crate) fn resolve_identifier_options<T>(
    handlers: &ModelHandlers<T>,
    identifier: &str,
) -> Vec<IdentifierOption> {
    let trimmed = identifier.trim();
    let mut options: Vec<IdentifierOption> = handlers
        .resolve_identifier(identifier)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|option| {
            let column = option.column.trim();
            if column.is_empty() {
                return None;
            }
            let value = match option.value.trim() {
                "" => trimmed,
                value => value,
            };
            (!value.is_empty()).then(|| IdentifierOption::new(column, value))
        })
        .collect();

    if options.is_empty() {
        let column = handlers
            .identifier_column()
            .unwrap_or_else(|| "id".to_string());
        options.push(IdentifierOption::new(column, trimmed));
    }
    options
}

pub(crate) fn not_found_as_none<T>(result: RepoResult<T>) -> RepoResult<Option<T>> {
    match result {
        Ok(record) => Ok(Some(record)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

impl<T: Model> Repository<T> {
    /// Finds the stored row `record` refers to.
    ///
    /// Tries, in order: the primary key when non-nil, the identifier value
    /// when non-blank, then the custom lookup resolver. An empty resolver
    /// result is skipped.
    pub fn find_existing_tx(
        &self,
        ctx: &Context,
        conn: &Connection,
        record: &T,
    ) -> RepoResult<Option<T>> {
        let handlers = self.handlers();

        let id = handlers.get_id(record);
        if !id.is_nil() {
            if let Some(found) = not_found_as_none(self.get_by_id_tx(ctx, conn, id, &[]))? {
                return Ok(Some(found));
            }
        }

        if let Some(value) = handlers.identifier_value(record) {
            if let Some(found) =
                not_found_as_none(self.get_by_identifier_tx(ctx, conn, &value, &[]))?
            {
                return Ok(Some(found));
            }
        }

        if let Some(criteria) = handlers.lookup_criteria(ctx, record) {
            if !criteria.is_empty() {
                return not_found_as_none(self.get_tx(ctx, conn, &criteria));
            }
        }

        Ok(None)
    }

    pub fn find_existing(&self, ctx: &Context, record: &T) -> RepoResult<Option<T>> {
        self.db()
            .with_connection(|conn| self.find_existing_tx(ctx, conn, record))
    }
}

#[cfg(test)]
mod tests {
    use super::{not_found_as_none, resolve_identifier_options};
    use crate::error::{DatabaseError, RepoError};
    use crate::repo::{IdentifierOption, ModelHandlers};
    use uuid::Uuid;

    #[derive(Debug, Clone, Default)]
    struct Account {
        id: Uuid,
    }

    fn handlers() -> ModelHandlers<Account> {
        ModelHandlers::new(
            Account::default,
            |account: &Account| account.id,
            |account: &mut Account, id| account.id = id,
        )
    }

    #[test]
    fn falls_back_to_id_column() {
        assert_eq!(
            resolve_identifier_options(&handlers(), " abc "),
            vec![IdentifierOption::new("id", "abc")]
        );
    }

    #[test]
    fn resolver_options_are_trimmed_and_filtered() {
        let handlers = handlers()
            .with_identifier("email", |_: &Account| String::new())
            .with_identifier_resolver(|_| {
                vec![
                    IdentifierOption::new(" ", "skipped"),
                    IdentifierOption::new(" email ", ""),
                    IdentifierOption::new("username", " ada "),
                ]
            });
        assert_eq!(
            resolve_identifier_options(&handlers, " a@x.io "),
            vec![
                IdentifierOption::new("email", "a@x.io"),
                IdentifierOption::new("username", "ada"),
            ]
        );
    }

    #[test]
    fn empty_resolver_result_uses_configured_column() {
        let handlers = handlers()
            .with_identifier("email", |_: &Account| String::new())
            .with_identifier_resolver(|_| Vec::new());
        assert_eq!(
            resolve_identifier_options(&handlers, "a@x.io"),
            vec![IdentifierOption::new("email", "a@x.io")]
        );
    }

    #[test]
    fn only_not_found_is_swallowed() {
        let missing: Result<(), RepoError> = Err(DatabaseError::not_found().into());
        assert!(not_found_as_none(missing).unwrap().is_none());

        let count: Result<(), RepoError> = Err(DatabaseError::expected_count(1, 0).into());
        assert!(not_found_as_none(count).is_err());
    }
}
