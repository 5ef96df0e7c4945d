//! Repository construction options.

/// Limit applied to `list` when the caller gives none.
pub const DEFAULT_LIST_LIMIT: i64 = 25;
pub const DEFAULT_LIST_OFFSET: i64 = 0;

/// Default `list` pagination; `None` disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListPagination {
    pub limit: i64,
    pub offset: i64,
}

impl ListPagination {
    /// Normalizes raw values: a non-positive limit disables pagination and a
    /// negative offset becomes zero.
    pub fn normalized(limit: i64, offset: i64) -> Option<Self> {
        (limit > 0).then(|| Self {
            limit,
            offset: offset.max(0),
        })
    }
}

/// Options passed to `Repository::try_new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoOptions {
    pub(crate) list_pagination: Option<ListPagination>,
    pub(crate) allow_full_table_delete: bool,
}

impl Default for RepoOptions {
    fn default() -> Self {
        Self {
            list_pagination: ListPagination::normalized(DEFAULT_LIST_LIMIT, DEFAULT_LIST_OFFSET),
            allow_full_table_delete: false,
        }
    }
}

impl RepoOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_list_pagination(mut self, limit: i64, offset: i64) -> Self {
        self.list_pagination = ListPagination::normalized(limit, offset);
        self
    }

    /// Permits `delete_where`/`delete_many` without any predicate.
    pub fn allow_full_table_delete(mut self, allow: bool) -> Self {
        self.allow_full_table_delete = allow;
        self
    }

    pub fn list_pagination(&self) -> Option<ListPagination> {
        self.list_pagination
    }
}

#[cfg(test)]
mod tests {
    use super::{ListPagination, RepoOptions};

    #[test]
    fn defaults_paginate_and_guard_deletes() {
        let options = RepoOptions::default();
        assert_eq!(
            options.list_pagination(),
            Some(ListPagination {
                limit: 25,
                offset: 0
            })
        );
        assert!(!options.allow_full_table_delete);
    }

    #[test]
    fn pagination_is_normalized() {
        assert_eq!(ListPagination::normalized(0, 10), None);
        assert_eq!(
            ListPagination::normalized(5, -3),
            Some(ListPagination { limit: 5, offset: 0 })
        );
    }
}
