//! Record model contracts, field descriptors and payload values.
//!
//! # Responsibility
//! - Define how a record type exposes its persisted fields (`Fields`).
//! - Bind a record type to its table (`Model`).
//! - Provide the weakly-typed `Value` used by payloads and SQL parameters.
//!
//! # Invariants
//! - Field tables are declared in code with accessor closures, not derived
//!   from runtime reflection.
//! - Each record type's descriptor is built once and shared.
//!
//! # See also
//! - `mapping` for projection/patch over descriptors.

mod descriptor;
mod meta;
mod value;

pub use descriptor::{
    descriptor_for, DescriptorError, FieldBinding, FieldOptions, FieldSet, ModelDescriptor,
    NamingStrategy,
};
pub use meta::{generate_model_meta, FieldMeta, ModelMeta};
pub use value::{parse_timestamp, CoerceError, FieldType, Value, ValueKind};

/// A struct whose persisted fields can be described.
///
/// Embedded structs implement only `Fields`; table-backed records also
/// implement `Model`.
pub trait Fields: Sized + 'static {
    fn describe(fields: &mut FieldSet<Self>);
}

/// A table-backed record type.
pub trait Model: Fields + Clone + Send + Sync {
    fn table_name() -> &'static str;
}
