//! Generic repository layer.
//!
//! # Responsibility
//! - Expose `Repository<T>` with scoped CRUD, upsert and get-or-create.
//! - Keep per-record capabilities (`ModelHandlers`) and construction
//!   options (`RepoOptions`) separate from statement building.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`, `ExpectedCount`)
//!   in the same taxonomy as store transport errors.
//!
//! # See also
//! - `crate::query` for the statement builders driven by criteria.

mod handlers;
mod identity;
mod options;
mod reorder;
mod repository;
mod scan;

pub use handlers::{IdentifierOption, IdentifierResolver, LookupResolver, ModelHandlers};
pub use options::{ListPagination, RepoOptions, DEFAULT_LIST_LIMIT, DEFAULT_LIST_OFFSET};
pub use repository::Repository;
