//! Serializable model metadata derived from descriptors.

use super::descriptor::{descriptor_for, DescriptorError, ModelDescriptor};
use super::value::ValueKind;
use super::Model;
use serde::{Deserialize, Serialize};

/// Table-level metadata for one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMeta {
    pub table_name: String,
    pub fields: Vec<FieldMeta>,
}

/// Metadata for one persisted field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    /// External payload name; empty when excluded from payloads.
    pub name: String,
    pub struct_name: String,
    pub column: String,
    #[serde(rename = "type")]
    pub kind: ValueKind,
    pub is_nullable: bool,
    pub is_unique: bool,
    pub is_pk: bool,
    pub is_soft_delete: bool,
}

impl ModelMeta {
    pub fn from_descriptor<T>(table_name: &str, descriptor: &ModelDescriptor<T>) -> Self {
        let fields = descriptor
            .fields()
            .iter()
            .map(|field| FieldMeta {
                name: field.external_name().unwrap_or_default().to_string(),
                struct_name: field.declared_name().to_string(),
                column: field.storage_name().to_string(),
                kind: field.kind(),
                is_nullable: field.is_nullable(),
                is_unique: field.is_unique(),
                is_pk: field.is_primary_key(),
                is_soft_delete: field.is_soft_delete(),
            })
            .collect();

        Self {
            table_name: table_name.to_string(),
            fields,
        }
    }

    pub fn field(&self, column: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|field| field.column == column)
    }
}

/// Generates metadata for `T` from its cached descriptor.
pub fn generate_model_meta<T: Model>() -> Result<ModelMeta, DescriptorError> {
    let descriptor = descriptor_for::<T>()?;
    Ok(ModelMeta::from_descriptor(T::table_name(), &descriptor))
}
