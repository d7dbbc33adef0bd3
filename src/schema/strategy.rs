use std::collections::BTreeSet;

use indexmap::IndexMap;
use typed_builder::TypedBuilder;

use crate::value::{FieldType, FieldValue};

/// A field introduced by an upgrade step.
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
#[builder(doc)]
pub struct FieldUpgradeDefinition {
    #[builder(setter(into))]
    pub name: String,

    pub field_type: FieldType,

    #[builder(default, setter(into))]
    pub default_value: FieldValue,

    /// Named transform applied to the newly added value.
    #[builder(default, setter(strip_option, into))]
    pub transform: Option<String>,

    #[builder(default, setter(into))]
    pub description: String,
}

/// Field-level rule for moving a record from `from_version` to
/// `from_version + 1`.
///
/// Steps are applied in this order: add, remove, rename, transform.
///
/// ```
/// use versioned_node_store::schema::{FieldUpgradeDefinition, UpgradeStrategy};
/// use versioned_node_store::FieldType;
///
/// let strategy = UpgradeStrategy::new(1)
///     .add_field(
///         FieldUpgradeDefinition::builder()
///             .name("status")
///             .field_type(FieldType::String)
///             .default_value("PENDING")
///             .build(),
///     )
///     .rename_field("desc", "description");
/// assert_eq!(strategy.to_version(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpgradeStrategy {
    pub from_version: u32,
    pub description: String,
    pub add_fields: Vec<FieldUpgradeDefinition>,
    pub remove_fields: BTreeSet<String>,
    pub rename_fields: IndexMap<String, String>,
    pub transform_functions: IndexMap<String, String>,
}

impl UpgradeStrategy {
    pub fn new(from_version: u32) -> Self {
        Self {
            from_version,
            ..Default::default()
        }
    }

    pub fn to_version(&self) -> u32 {
        self.from_version + 1
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn add_field(mut self, field: FieldUpgradeDefinition) -> Self {
        self.add_fields.push(field);
        self
    }

    pub fn remove_field(mut self, name: impl Into<String>) -> Self {
        self.remove_fields.insert(name.into());
        self
    }

    pub fn rename_field(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.rename_fields.insert(old.into(), new.into());
        self
    }

    pub fn transform(mut self, field: impl Into<String>, transform: impl Into<String>) -> Self {
        self.transform_functions.insert(field.into(), transform.into());
        self
    }

    /// A strategy that changes nothing.
    pub fn is_empty(&self) -> bool {
        self.add_fields.is_empty()
            && self.remove_fields.is_empty()
            && self.rename_fields.is_empty()
            && self.transform_functions.is_empty()
    }
}
