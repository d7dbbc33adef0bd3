use std::sync::LazyLock;

use log::debug;
use regex::Regex;

use crate::errors::FieldViolation;
use crate::schema::{FieldDefinition, SchemaVersion, ValidationMode};
use crate::validity::is_reserved_field;
use crate::value::{FieldValue, Payload};

static EMAIL: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());
static PHONE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\+?[\d\s-]+$").ok());

/// Checks a payload against one schema version.
///
/// All violations are collected. Fields whose mode is `coerce` (or
/// `lenient`, when conversion succeeds) are rewritten in place to the
/// declared type.
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    schema: &'a SchemaVersion,
    reject_unknown: bool,
}

impl<'a> Validator<'a> {
    pub fn new(schema: &'a SchemaVersion) -> Self {
        Self {
            schema,
            reject_unknown: false,
        }
    }

    /// Reject payload fields the schema does not declare. Bookkeeping fields
    /// (leading `_`, `id`, `date_from`, `date_to`) are always allowed.
    pub fn reject_unknown(mut self, reject: bool) -> Self {
        self.reject_unknown = reject;
        self
    }

    pub fn validate(&self, payload: &mut Payload) -> Result<(), Vec<FieldViolation>> {
        let mut violations = self.missing_required(payload);

        for (name, value) in payload.iter_mut() {
            let Some(field) = self.schema.field(name) else {
                if self.reject_unknown && !name.starts_with('_') && !is_reserved_field(name) {
                    violations.push(FieldViolation::new(name.as_str(), "unknown field"));
                }
                continue;
            };
            if value.is_null() {
                // reported by missing_required when the field is required
                continue;
            }
            if let Err(violation) = check_type(field, value) {
                violations.push(violation);
                continue;
            }
            check_constraints(field, value, &mut violations);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Required-field presence only.
    pub fn check_required(&self, payload: &Payload) -> Result<(), Vec<FieldViolation>> {
        let violations = self.missing_required(payload);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    fn missing_required(&self, payload: &Payload) -> Vec<FieldViolation> {
        self.schema
            .required_fields()
            .filter_map(|field| match payload.get(&field.name) {
                None => Some(FieldViolation::new(field.name.as_str(), "required field is missing")),
                Some(value) if value.is_null() => {
                    Some(FieldViolation::new(field.name.as_str(), "required field is null"))
                }
                Some(_) => None,
            })
            .collect()
    }
}

fn check_type(field: &FieldDefinition, value: &mut FieldValue) -> Result<(), FieldViolation> {
    let declared = field.field_type;
    let Some(kind) = value.kind() else {
        return Ok(());
    };
    match field.validation_mode {
        ValidationMode::None => Ok(()),
        ValidationMode::Strict if kind == declared => Ok(()),
        ValidationMode::Strict => Err(FieldViolation::new(
            field.name.as_str(),
            format!("expected {declared}, found {kind}"),
        )),
        ValidationMode::Coerce => {
            let converted = value
                .convert_to(declared)
                .map_err(|e| FieldViolation::new(field.name.as_str(), e.to_string()))?;
            *value = converted;
            Ok(())
        }
        ValidationMode::Lenient => {
            if let Ok(converted) = value.convert_to(declared) {
                *value = converted;
            }
            Ok(())
        }
        ValidationMode::Loose if kind.can_convert_to(declared) => Ok(()),
        ValidationMode::Loose => Err(FieldViolation::new(
            field.name.as_str(),
            format!("{kind} is not convertible to {declared}"),
        )),
    }
}

fn check_constraints(field: &FieldDefinition, value: &FieldValue, out: &mut Vec<FieldViolation>) {
    let c = &field.constraints;
    let name = field.name.as_str();
    let mut fail = |reason: String| out.push(FieldViolation::new(name, reason));

    let length = value.length().unwrap_or_else(|| value.to_string().chars().count());
    if let Some(max) = c.max_length
        && length > max
    {
        fail(format!("length {length} exceeds maximum {max}"));
    }
    if let Some(min) = c.min_length
        && length < min
    {
        fail(format!("length {length} is below minimum {min}"));
    }

    if let Some(pattern) = &c.pattern {
        match Regex::new(&format!("^(?:{pattern})$")) {
            Ok(re) if re.is_match(&value.to_string()) => {}
            Ok(_) => fail(format!("does not match pattern `{pattern}`")),
            Err(e) => fail(format!("pattern `{pattern}` is invalid: {e}")),
        }
    }

    if let Some(format) = &c.format {
        let re = match format.to_ascii_lowercase().as_str() {
            "email" => EMAIL.as_ref(),
            "phone" => PHONE.as_ref(),
            other => {
                debug!("Unknown format `{other}` on field `{name}`, not checked");
                None
            }
        };
        if let Some(re) = re
            && !re.is_match(&value.to_string())
        {
            fail(format!("is not a valid {format}"));
        }
    }

    if let Some(allowed) = &c.allowed_values {
        let json = value.to_json();
        let text = value.to_string();
        let permitted = allowed
            .iter()
            .any(|a| *a == json || FieldValue::from_json(a.clone()).to_string() == text);
        if !permitted {
            fail(format!("`{text}` is not an allowed value"));
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(min) = c.min_value
            && number < min
        {
            fail(format!("{number} is below minimum {min}"));
        }
        if let Some(max) = c.max_value
            && number > max
        {
            fail(format!("{number} exceeds maximum {max}"));
        }
    }

    if let (Some(precision), Some(places)) = (c.precision, value.decimal_places())
        && places > precision
    {
        fail(format!("{places} decimal places exceed precision {precision}"));
    }
}
