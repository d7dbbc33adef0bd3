use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::value::{FieldType, FieldValue, round_decimal};

/// A named, fallible value conversion used by upgrade strategies.
pub type TransformFn = Arc<dyn Fn(&FieldValue) -> Result<FieldValue, String> + Send + Sync>;

/// Highest precision with a built-in `to_decimal_<n>` transform.
pub const MAX_BUILTIN_PRECISION: usize = 6;

/// Transforms available to upgrade strategies, by name.
///
/// A new registry holds the built-ins: `to_string`, `to_integer`,
/// `to_decimal` (2 places), `to_decimal_0` to `to_decimal_6`, `to_boolean`,
/// `trim`, `uppercase` and `lowercase`.
pub struct TransformRegistry {
    transforms: RwLock<HashMap<String, TransformFn>>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        let registry = Self::empty();
        registry.register("to_string", |v| convert(v, FieldType::String));
        registry.register("to_integer", |v| convert(v, FieldType::Integer));
        registry.register("to_boolean", |v| convert(v, FieldType::Boolean));
        registry.register("to_decimal", |v| to_decimal(v, 2));
        for places in 0..=MAX_BUILTIN_PRECISION {
            registry.register(format!("to_decimal_{places}"), move |v| to_decimal(v, places));
        }
        registry.register("trim", |v| map_text(v, |s| s.trim().to_string()));
        registry.register("uppercase", |v| map_text(v, str::to_uppercase));
        registry.register("lowercase", |v| map_text(v, str::to_lowercase));
        registry
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.transforms.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("TransformRegistry").field("transforms", &names).finish()
    }
}

impl TransformRegistry {
    /// A registry with the built-ins.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with nothing in it.
    pub fn empty() -> Self {
        Self {
            transforms: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) a transform.
    pub fn register<F>(&self, name: impl Into<String>, transform: F)
    where
        F: Fn(&FieldValue) -> Result<FieldValue, String> + Send + Sync + 'static,
    {
        self.transforms.write().insert(name.into(), Arc::new(transform));
    }

    pub fn get(&self, name: &str) -> Option<TransformFn> {
        self.transforms.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transforms.read().contains_key(name)
    }
}

fn convert(value: &FieldValue, target: FieldType) -> Result<FieldValue, String> {
    value.convert_to(target).map_err(|e| e.to_string())
}

fn to_decimal(value: &FieldValue, places: usize) -> Result<FieldValue, String> {
    let FieldValue::Decimal(text) = convert(value, FieldType::Decimal)? else {
        return Ok(FieldValue::Null);
    };
    round_decimal(&text, places)
        .map(FieldValue::Decimal)
        .ok_or_else(|| format!("`{text}` is not a decimal"))
}

fn map_text(value: &FieldValue, f: impl Fn(&str) -> String) -> Result<FieldValue, String> {
    match value {
        FieldValue::Null => Ok(FieldValue::Null),
        FieldValue::String(s) => Ok(FieldValue::String(f(s))),
        FieldValue::Reference(s) => Ok(FieldValue::Reference(f(s))),
        other => Err(format!("expected text, found {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(registry: &TransformRegistry, name: &str, value: FieldValue) -> Result<FieldValue, String> {
        let transform = registry.get(name).unwrap();
        transform(&value)
    }

    #[test]
    fn test_builtin_transforms() {
        let registry = TransformRegistry::new();
        assert_eq!(
            apply(&registry, "to_decimal", FieldValue::from("10")).unwrap(),
            FieldValue::Decimal("10.00".into())
        );
        assert_eq!(
            apply(&registry, "to_decimal_3", FieldValue::Integer(7)).unwrap(),
            FieldValue::Decimal("7.000".into())
        );
        assert_eq!(
            apply(&registry, "uppercase", FieldValue::from("abc")).unwrap(),
            FieldValue::from("ABC")
        );
        assert_eq!(
            apply(&registry, "to_integer", FieldValue::from(" 42 ")).unwrap(),
            FieldValue::Integer(42)
        );
        assert!(apply(&registry, "to_integer", FieldValue::from("forty")).is_err());
        assert!(registry.contains("to_decimal_6"));
        assert!(!registry.contains("to_decimal_7"));
    }

    #[test]
    fn test_custom_transform_replaces_builtin() {
        let registry = TransformRegistry::new();
        registry.register("trim", |_| Ok(FieldValue::from("replaced")));
        assert_eq!(
            apply(&registry, "trim", FieldValue::from("  x ")).unwrap(),
            FieldValue::from("replaced")
        );
        assert!(TransformRegistry::empty().get("trim").is_none());
    }
}
