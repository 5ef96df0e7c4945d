//! Scoped, typed repositories over SQLite.
//!
//! A record type describes its fields once (`model::Fields`); from that
//! table the crate derives statement columns, row decoding, map projection
//! and map patching. `repo::Repository` layers named scopes, race-safe
//! upsert/get-or-create and a normalized error taxonomy on top.

pub mod context;
pub mod db;
pub mod error;
pub mod logging;
pub mod mapping;
pub mod model;
pub mod query;
pub mod repo;
pub mod scope;

pub use context::{CancelHandle, Context, ContextError};
pub use db::{open_db, open_db_in_memory, Database, DbError, DbResult};
pub use error::{
    map_database_error, DatabaseError, ErrorCategory, FieldError, RepoError, RepoResult,
    Retryability, ValidationError,
};
pub use logging::{default_log_level, init_logging, logging_status, LogConfig, LoggingError};
pub use mapping::{
    apply_map_patch, apply_map_patch_in_place, map_to_record, project,
    update_criteria_for_map_patch, MapRecordMapper, PatchError, PatchOptions, Payload,
    ProjectionOptions,
};
pub use model::{Fields, FieldSet, Model, NamingStrategy, Value};
pub use repo::{IdentifierOption, ModelHandlers, RepoOptions, Repository};
pub use scope::{ScopeDefaults, ScopeDefinition, ScopeOperation, ScopeRegistry};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
