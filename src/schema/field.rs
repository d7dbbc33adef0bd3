use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString};
use typed_builder::TypedBuilder;

use crate::value::{FieldType, FieldValue};

/// How strictly a field's value is checked against its declared type.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ValidationMode {
    /// No type check.
    #[default]
    None,
    /// The value must already have the declared type.
    Strict,
    /// Convert when possible, keep the original value otherwise.
    Lenient,
    /// Convert to the declared type; failure is a violation.
    Coerce,
    /// Any value convertible to the declared type is accepted as-is.
    Loose,
}

/// Optional per-field constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    /// Regular expression the whole value must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Named format: `email` or `phone`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    /// Maximum number of decimal places.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<usize>,
    /// Position of the field in external layouts. Not checked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_number: Option<u32>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        *self == Constraints::default()
    }

    /// Fill every constraint unset in `self` from `other`.
    pub fn or(self, other: Constraints) -> Constraints {
        Constraints {
            max_length: self.max_length.or(other.max_length),
            min_length: self.min_length.or(other.min_length),
            pattern: self.pattern.or(other.pattern),
            format: self.format.or(other.format),
            allowed_values: self.allowed_values.or(other.allowed_values),
            min_value: self.min_value.or(other.min_value),
            max_value: self.max_value.or(other.max_value),
            precision: self.precision.or(other.precision),
            field_number: self.field_number.or(other.field_number),
        }
    }
}

/// Definition of one field within a schema version.
///
/// ```
/// use versioned_node_store::schema::{FieldDefinition, ValidationMode};
/// use versioned_node_store::FieldType;
///
/// let status = FieldDefinition::builder()
///     .name("status")
///     .field_type(FieldType::String)
///     .required(true)
///     .validation_mode(ValidationMode::Strict)
///     .build();
/// assert_eq!(status.name, "status");
/// ```
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
#[builder(doc)]
pub struct FieldDefinition {
    #[builder(setter(into))]
    pub name: String,

    pub field_type: FieldType,

    #[builder(default = false)]
    pub required: bool,

    #[builder(default)]
    pub validation_mode: ValidationMode,

    #[builder(default, setter(into))]
    pub default_value: FieldValue,

    #[builder(default, setter(into))]
    pub description: String,

    #[builder(default)]
    pub constraints: Constraints,
}
