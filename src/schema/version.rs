use indexmap::IndexMap;

use crate::errors::{NodeStoreError, NodeStoreResult};
use crate::schema::FieldDefinition;
use crate::value::Payload;

/// A numbered, immutable field-set definition for a node type.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaVersion {
    version: u32,
    fields: IndexMap<String, FieldDefinition>,
    description: String,
}

impl SchemaVersion {
    /// Build a version from its fields, in declaration order.
    ///
    /// Fails with `InvalidSchema` for version `0` or a repeated field name.
    pub fn new(
        version: u32,
        description: impl Into<String>,
        fields: impl IntoIterator<Item = FieldDefinition>,
    ) -> NodeStoreResult<Self> {
        if version == 0 {
            return Err(NodeStoreError::InvalidSchema {
                path: None,
                reason: "schema versions start at 1".into(),
            });
        }
        let mut by_name = IndexMap::new();
        for field in fields {
            if by_name.contains_key(&field.name) {
                return Err(NodeStoreError::InvalidSchema {
                    path: None,
                    reason: format!("field `{}` declared twice in version {version}", field.name),
                });
            }
            by_name.insert(field.name.clone(), field);
        }
        Ok(Self {
            version,
            fields: by_name,
            description: description.into(),
        })
    }

    /// Version 1 with no fields: what an unregistered node type looks like.
    pub fn unversioned() -> Self {
        Self {
            version: 1,
            fields: IndexMap::new(),
            description: String::new(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.values()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.values().filter(|f| f.required)
    }

    /// Re-type declared fields to their declared type where the conversion
    /// succeeds. Values that cannot be converted are left untouched.
    pub fn normalize(&self, payload: &mut Payload) {
        for (name, value) in payload.iter_mut() {
            let Some(field) = self.fields.get(name) else {
                continue;
            };
            if value.is_null() || value.kind() == Some(field.field_type) {
                continue;
            }
            if let Ok(converted) = value.decode_as(field.field_type) {
                *value = converted;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{FieldType, FieldValue};
    use crate::payload;

    fn field(name: &str, field_type: FieldType) -> FieldDefinition {
        FieldDefinition::builder().name(name).field_type(field_type).build()
    }

    #[test]
    fn test_duplicate_field_names_rejected() {
        let result = SchemaVersion::new(
            1,
            "",
            [field("name", FieldType::String), field("name", FieldType::Integer)],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_version_zero_rejected() {
        assert!(SchemaVersion::new(0, "", []).is_err());
    }

    #[test]
    fn test_declaration_order_is_kept() {
        let schema = SchemaVersion::new(
            2,
            "order",
            [field("zeta", FieldType::String), field("alpha", FieldType::String)],
        )
        .unwrap();
        let names: Vec<_> = schema.fields().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["zeta", "alpha"]);
    }

    #[test]
    fn test_normalize_retypes_declared_fields_only() {
        let schema = SchemaVersion::new(
            1,
            "",
            [field("price", FieldType::Decimal), field("qty", FieldType::Integer)],
        )
        .unwrap();
        let mut p = payload! { "price" => "4.20", "qty" => "seven", "note" => "12" };
        schema.normalize(&mut p);
        assert_eq!(p["price"], FieldValue::Decimal("4.20".into()));
        assert_eq!(p["qty"], FieldValue::from("seven"));
        assert_eq!(p["note"], FieldValue::from("12"));
    }

    #[test]
    fn test_normalize_restores_timestamps_but_not_truncated_decimals() {
        let schema = SchemaVersion::new(
            1,
            "",
            [field("seen_at", FieldType::Timestamp), field("qty", FieldType::Integer)],
        )
        .unwrap();
        let mut p = payload! { "seen_at" => 1_700_000_000_000i64, "qty" => FieldValue::Decimal("2.5".into()) };
        schema.normalize(&mut p);
        assert_eq!(p["seen_at"], FieldValue::Timestamp(1_700_000_000_000));
        assert_eq!(p["qty"], FieldValue::Decimal("2.5".into()));
    }
}
