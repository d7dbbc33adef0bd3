//! Typed field values.
//!
//! A node's payload is a mapping from field name to [`FieldValue`]. Values are
//! a tagged union keyed by [`FieldType`], so constraint checks and transforms
//! can match on the variant instead of probing a dynamic value at runtime.
//!
//! # JSON encoding
//!
//! On disk payloads are plain JSON objects. JSON cannot tell a decimal from a
//! string or a date from a string, so the encoding is lossy in one direction:
//!
//! | Variant     | JSON                         |
//! |-------------|------------------------------|
//! | `Decimal`   | string (`"12.50"`)           |
//! | `DateTime`  | RFC 3339 string              |
//! | `Date`      | `YYYY-MM-DD` string          |
//! | `Timestamp` | integer (epoch milliseconds) |
//! | `Reference` | string                       |
//!
//! Reading JSON back yields `String`/`Integer` for those variants; the schema
//! layer re-types declared fields (see
//! [`SchemaVersion::normalize`](crate::schema::SchemaVersion::normalize)).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, EnumString};

use crate::errors::ConversionError;
use crate::utils::{from_epoch_millis, parse_date, parse_datetime};

/// A node payload: field name to value.
pub type Payload = BTreeMap<String, FieldValue>;

/// Declared type of a schema field.
///
/// Parsing accepts the upper-case aliases used by older metadata files
/// (`TEXT`, `FLOAT`, `DATE`, `TIMESTAMP`, `dict`).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FieldType {
    #[serde(alias = "TEXT", alias = "text", alias = "STRING")]
    #[strum(to_string = "string", serialize = "text")]
    String,
    #[serde(alias = "INTEGER", alias = "int")]
    Integer,
    #[serde(alias = "DECIMAL", alias = "FLOAT", alias = "float")]
    #[strum(to_string = "decimal", serialize = "float")]
    Decimal,
    #[serde(alias = "BOOLEAN", alias = "bool")]
    Boolean,
    #[serde(alias = "DATETIME")]
    DateTime,
    #[serde(alias = "DATE")]
    Date,
    #[serde(alias = "TIMESTAMP")]
    Timestamp,
    #[serde(alias = "LIST")]
    List,
    #[serde(alias = "dict", alias = "DICT", alias = "MAPPING")]
    #[strum(to_string = "mapping", serialize = "dict")]
    Mapping,
    #[serde(alias = "REFERENCE")]
    Reference,
}

impl FieldType {
    /// Whether a value of type `self` may be converted to `target`.
    ///
    /// Strings may be parsed into any scalar type; structured types only
    /// convert to themselves.
    pub fn can_convert_to(self, target: FieldType) -> bool {
        use FieldType::*;
        if self == target {
            return true;
        }
        match self {
            String => !matches!(target, List | Mapping),
            Integer => matches!(target, Decimal | String),
            Decimal => matches!(target, String),
            Boolean => matches!(target, String),
            DateTime | Date | Timestamp => matches!(target, DateTime | Date | Timestamp | String),
            List | Mapping | Reference => false,
        }
    }

    /// Value used when an added field has no explicit default.
    pub fn implicit_default(self) -> FieldValue {
        match self {
            FieldType::String => FieldValue::String(std::string::String::new()),
            FieldType::Integer => FieldValue::Integer(0),
            FieldType::Decimal => FieldValue::Decimal("0.00".into()),
            _ => FieldValue::Null,
        }
    }
}

/// A single typed field value.
///
/// The serde derive gives the tagged binary form used by the sled backend;
/// JSON documents go through [`FieldValue::to_json`] / [`FieldValue::from_json`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FieldValue {
    #[default]
    Null,
    String(String),
    Integer(i64),
    /// Canonical decimal text, e.g. `"-12.50"`.
    Decimal(String),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    List(Vec<FieldValue>),
    Mapping(BTreeMap<String, FieldValue>),
    /// Reference to another node, conventionally `node_type/id`.
    Reference(String),
}

impl FieldValue {
    /// Build a decimal from text, rejecting anything that is not a plain
    /// decimal number.
    pub fn decimal(text: &str) -> Result<Self, ConversionError> {
        parse_decimal(text)
            .map(FieldValue::Decimal)
            .ok_or_else(|| conversion_error(&FieldValue::String(text.into()), FieldType::Decimal))
    }

    /// The value's type, or `None` for null.
    pub fn kind(&self) -> Option<FieldType> {
        Some(match self {
            FieldValue::Null => return None,
            FieldValue::String(_) => FieldType::String,
            FieldValue::Integer(_) => FieldType::Integer,
            FieldValue::Decimal(_) => FieldType::Decimal,
            FieldValue::Boolean(_) => FieldType::Boolean,
            FieldValue::DateTime(_) => FieldType::DateTime,
            FieldValue::Date(_) => FieldType::Date,
            FieldValue::Timestamp(_) => FieldType::Timestamp,
            FieldValue::List(_) => FieldType::List,
            FieldValue::Mapping(_) => FieldType::Mapping,
            FieldValue::Reference(_) => FieldType::Reference,
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) | FieldValue::Reference(s) | FieldValue::Decimal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) | FieldValue::Timestamp(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric view used by `min_value`/`max_value` checks.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Decimal(d) => d.parse().ok(),
            _ => None,
        }
    }

    /// Length used by `min_length`/`max_length` checks.
    pub fn length(&self) -> Option<usize> {
        match self {
            FieldValue::String(s) | FieldValue::Reference(s) => Some(s.chars().count()),
            FieldValue::List(items) => Some(items.len()),
            _ => None,
        }
    }

    /// Number of digits after the decimal point, for decimals.
    pub fn decimal_places(&self) -> Option<usize> {
        match self {
            FieldValue::Decimal(d) => Some(d.split_once('.').map_or(0, |(_, frac)| frac.len())),
            FieldValue::Integer(_) => Some(0),
            _ => None,
        }
    }

    /// Re-type a value decoded from JSON to its declared `target`. Undoes the
    /// lossy encoding first (timestamps are stored as plain integers), then
    /// falls back to [`convert_to`](Self::convert_to).
    pub fn decode_as(&self, target: FieldType) -> Result<FieldValue, ConversionError> {
        match (self, target) {
            (FieldValue::Integer(ms), FieldType::Timestamp) => Ok(FieldValue::Timestamp(*ms)),
            _ => self.convert_to(target),
        }
    }

    /// Convert to `target`, following [`FieldType::can_convert_to`].
    pub fn convert_to(&self, target: FieldType) -> Result<FieldValue, ConversionError> {
        let Some(kind) = self.kind() else {
            return Ok(FieldValue::Null);
        };
        if kind == target {
            return Ok(self.clone());
        }
        if !kind.can_convert_to(target) {
            return Err(conversion_error(self, target));
        }
        let converted = match (self, target) {
            (value, FieldType::String) => Some(FieldValue::String(value.to_string())),

            (FieldValue::String(s), FieldType::Integer) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| parse_decimal(s).and_then(|d| truncate_decimal(&d)))
                    .map(FieldValue::Integer)
            }

            (FieldValue::String(s), FieldType::Decimal) => {
                parse_decimal(s.trim()).map(FieldValue::Decimal)
            }
            (FieldValue::Integer(i), FieldType::Decimal) => Some(FieldValue::Decimal(i.to_string())),

            (FieldValue::String(s), FieldType::Boolean) => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => Some(FieldValue::Boolean(true)),
                    "false" | "0" | "no" | "off" => Some(FieldValue::Boolean(false)),
                    _ => None,
                }
            }

            (FieldValue::String(s), FieldType::DateTime) => {
                let s = s.trim();
                parse_datetime(s)
                    .or_else(|| {
                        parse_date(s)
                            .and_then(|d| d.and_hms_opt(0, 0, 0))
                            .map(|naive| naive.and_utc())
                    })
                    .map(FieldValue::DateTime)
            }
            (FieldValue::Date(d), FieldType::DateTime) => {
                d.and_hms_opt(0, 0, 0).map(|naive| FieldValue::DateTime(naive.and_utc()))
            }
            (FieldValue::Timestamp(ms), FieldType::DateTime) => {
                from_epoch_millis(*ms).map(FieldValue::DateTime)
            }

            (FieldValue::String(s), FieldType::Date) => parse_date(s.trim()).map(FieldValue::Date),
            (FieldValue::DateTime(dt), FieldType::Date) => Some(FieldValue::Date(dt.date_naive())),
            (FieldValue::Timestamp(ms), FieldType::Date) => {
                from_epoch_millis(*ms).map(|dt| FieldValue::Date(dt.date_naive()))
            }

            (FieldValue::String(s), FieldType::Timestamp) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| parse_datetime(s).map(|dt| dt.timestamp_millis()))
                    .map(FieldValue::Timestamp)
            }
            (FieldValue::DateTime(dt), FieldType::Timestamp) => {
                Some(FieldValue::Timestamp(dt.timestamp_millis()))
            }
            (FieldValue::Date(d), FieldType::Timestamp) => d
                .and_hms_opt(0, 0, 0)
                .map(|naive| FieldValue::Timestamp(naive.and_utc().timestamp_millis())),

            (FieldValue::String(s), FieldType::Reference) => Some(FieldValue::Reference(s.clone())),

            _ => None,
        };
        converted.ok_or_else(|| conversion_error(self, target))
    }

    /// Untyped JSON to value: strings stay strings, integral numbers become
    /// integers, other numbers become decimals.
    pub fn from_json(json: serde_json::Value) -> FieldValue {
        match json {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => match n.as_u64() {
                    Some(u) => FieldValue::Decimal(u.to_string()),
                    None => FieldValue::Decimal(n.as_f64().unwrap_or_default().to_string()),
                },
            },
            serde_json::Value::String(s) => FieldValue::String(s),
            serde_json::Value::Array(items) => {
                FieldValue::List(items.into_iter().map(FieldValue::from_json).collect())
            }
            serde_json::Value::Object(map) => FieldValue::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, FieldValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::String(s) | FieldValue::Decimal(s) | FieldValue::Reference(s) => {
                Value::String(s.clone())
            }
            FieldValue::Integer(i) | FieldValue::Timestamp(i) => Value::from(*i),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
            FieldValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            FieldValue::List(items) => Value::Array(items.iter().map(FieldValue::to_json).collect()),
            FieldValue::Mapping(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::String(s) | FieldValue::Decimal(s) | FieldValue::Reference(s) => {
                write!(f, "{s}")
            }
            FieldValue::Integer(i) | FieldValue::Timestamp(i) => write!(f, "{i}"),
            FieldValue::Boolean(b) => write!(f, "{b}"),
            FieldValue::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::List(_) | FieldValue::Mapping(_) => write!(f, "{}", self.to_json()),
        }
    }
}

macro_rules! impl_from_for_value {
    ($($ty:ty => |$v:ident| $body:expr),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from($v: $ty) -> Self {
                    $body
                }
            }
        )*
    };
}

impl_from_for_value!(
    &str => |v| FieldValue::String(v.to_string()),
    String => |v| FieldValue::String(v),
    i64 => |v| FieldValue::Integer(v),
    i32 => |v| FieldValue::Integer(i64::from(v)),
    u32 => |v| FieldValue::Integer(i64::from(v)),
    bool => |v| FieldValue::Boolean(v),
    DateTime<Utc> => |v| FieldValue::DateTime(v),
    NaiveDate => |v| FieldValue::Date(v),
    Vec<FieldValue> => |v| FieldValue::List(v),
    BTreeMap<String, FieldValue> => |v| FieldValue::Mapping(v),
);

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// Build a [`Payload`] from `key => value` pairs.
///
/// ```
/// use versioned_node_store::{payload, FieldValue};
///
/// let p = payload! { "name" => "Widget", "qty" => 3 };
/// assert_eq!(p["qty"], FieldValue::Integer(3));
/// ```
#[macro_export]
macro_rules! payload {
    () => { $crate::Payload::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut payload = $crate::Payload::new();
        $(
            payload.insert(::std::string::String::from($key), $crate::FieldValue::from($value));
        )+
        payload
    }};
}

/// Decode a JSON object into a payload. Non-object JSON yields `None`.
pub fn payload_from_json(json: serde_json::Value) -> Option<Payload> {
    match json {
        serde_json::Value::Object(map) => Some(
            map.into_iter()
                .map(|(k, v)| (k, FieldValue::from_json(v)))
                .collect(),
        ),
        _ => None,
    }
}

pub fn payload_to_json(payload: &Payload) -> serde_json::Value {
    serde_json::Value::Object(
        payload
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// Round decimal text to `places` digits after the point, half away from zero.
pub fn round_decimal(text: &str, places: usize) -> Option<String> {
    let canonical = parse_decimal(text)?;
    let (negative, digits) = match canonical.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, canonical.as_str()),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));

    let mut kept: Vec<u8> = int_part.bytes().map(|b| b - b'0').collect();
    let frac: Vec<u8> = frac_part.bytes().map(|b| b - b'0').collect();
    kept.extend(frac.iter().take(places));
    kept.extend(std::iter::repeat_n(0, places.saturating_sub(frac.len())));

    if frac.get(places).is_some_and(|d| *d >= 5) {
        let mut carry = true;
        for digit in kept.iter_mut().rev() {
            if !carry {
                break;
            }
            if *digit == 9 {
                *digit = 0;
            } else {
                *digit += 1;
                carry = false;
            }
        }
        if carry {
            kept.insert(0, 1);
        }
    }

    let split = kept.len() - places;
    let int_digits: String = kept[..split].iter().map(|d| char::from(b'0' + d)).collect();
    let frac_digits: String = kept[split..].iter().map(|d| char::from(b'0' + d)).collect();
    let int_digits = match int_digits.trim_start_matches('0') {
        "" => "0".to_string(),
        trimmed => trimmed.to_string(),
    };
    let is_zero = kept.iter().all(|d| *d == 0);
    let sign = if negative && !is_zero { "-" } else { "" };
    Some(if places == 0 {
        format!("{sign}{int_digits}")
    } else {
        format!("{sign}{int_digits}.{frac_digits}")
    })
}

/// Accepts `[+-]digits[.digits]` (either side may be empty, not both).
fn parse_decimal(text: &str) -> Option<String> {
    let (negative, unsigned) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part) {
        return None;
    }
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let mut out = String::with_capacity(text.len() + 1);
    if negative {
        out.push('-');
    }
    out.push_str(int_part);
    if unsigned.contains('.') && !frac_part.is_empty() {
        out.push('.');
        out.push_str(frac_part);
    }
    Some(out)
}

fn truncate_decimal(canonical: &str) -> Option<i64> {
    canonical.split('.').next()?.parse().ok()
}

fn conversion_error(value: &FieldValue, target: FieldType) -> ConversionError {
    ConversionError {
        from: value
            .kind()
            .map_or_else(|| "null".to_string(), |k| k.to_string()),
        to: target.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_field_type_aliases() {
        assert_eq!(FieldType::from_str("TEXT").unwrap(), FieldType::String);
        assert_eq!(FieldType::from_str("FLOAT").unwrap(), FieldType::Decimal);
        assert_eq!(FieldType::from_str("dict").unwrap(), FieldType::Mapping);
        assert_eq!(FieldType::from_str("TIMESTAMP").unwrap(), FieldType::Timestamp);
        assert_eq!(FieldType::Decimal.to_string(), "decimal");

        let parsed: FieldType = serde_json::from_str("\"DATE\"").unwrap();
        assert_eq!(parsed, FieldType::Date);
    }

    #[test]
    fn test_conversion_table() {
        assert!(FieldType::Integer.can_convert_to(FieldType::Decimal));
        assert!(!FieldType::Boolean.can_convert_to(FieldType::Integer));
        assert!(!FieldType::List.can_convert_to(FieldType::String));
        assert!(FieldType::Date.can_convert_to(FieldType::Timestamp));
        assert!(!FieldType::Decimal.can_convert_to(FieldType::Integer));
        assert!(!FieldType::Integer.can_convert_to(FieldType::Timestamp));
        assert!(!FieldType::Reference.can_convert_to(FieldType::String));
        assert!(FieldType::String.can_convert_to(FieldType::Reference));

        assert!(FieldValue::Decimal("12.50".into()).convert_to(FieldType::Integer).is_err());
        assert!(FieldValue::Integer(1_700_000_000_000).convert_to(FieldType::Timestamp).is_err());
        assert!(FieldValue::Reference("masterdata/widget/1".into()).convert_to(FieldType::String).is_err());
    }

    #[test]
    fn test_string_parsing_conversions() {
        let v = FieldValue::from("42");
        assert_eq!(v.convert_to(FieldType::Integer).unwrap(), FieldValue::Integer(42));
        assert_eq!(
            FieldValue::from("12.5").convert_to(FieldType::Integer).unwrap(),
            FieldValue::Integer(12)
        );
        assert_eq!(
            FieldValue::from("yes").convert_to(FieldType::Boolean).unwrap(),
            FieldValue::Boolean(true)
        );
        assert!(FieldValue::from("maybe").convert_to(FieldType::Boolean).is_err());
        assert_eq!(
            FieldValue::from("2024-05-01").convert_to(FieldType::Date).unwrap(),
            FieldValue::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
        );
    }

    #[test]
    fn test_rejected_conversion_reports_types() {
        let err = FieldValue::Boolean(true)
            .convert_to(FieldType::Integer)
            .unwrap_err();
        assert_eq!(err.from, "boolean");
        assert_eq!(err.to, "integer");
    }

    #[test]
    fn test_json_encoding_is_schema_free() {
        let p = payload! {
            "name" => "Widget",
            "price" => FieldValue::decimal("9.90").unwrap(),
            "tags" => vec![FieldValue::from("a")],
        };
        let json = payload_to_json(&p);
        assert_eq!(json["price"], serde_json::json!("9.90"));

        let back = payload_from_json(json).unwrap();
        assert_eq!(back["name"], FieldValue::from("Widget"));
        // decimals come back as text until a schema re-types them
        assert_eq!(back["price"], FieldValue::from("9.90"));
    }

    #[test]
    fn test_round_decimal() {
        assert_eq!(round_decimal("1.005", 2).as_deref(), Some("1.01"));
        assert_eq!(round_decimal("9.999", 2).as_deref(), Some("10.00"));
        assert_eq!(round_decimal("-0.004", 2).as_deref(), Some("0.00"));
        assert_eq!(round_decimal("7", 2).as_deref(), Some("7.00"));
        assert_eq!(round_decimal("2.5", 0).as_deref(), Some("3"));
        assert_eq!(round_decimal("abc", 2), None);
    }

    #[test]
    fn test_decimal_places() {
        assert_eq!(FieldValue::decimal("3.125").unwrap().decimal_places(), Some(3));
        assert_eq!(FieldValue::decimal(".5").unwrap(), FieldValue::Decimal("0.5".into()));
        assert!(FieldValue::decimal("1e5").is_err());
    }
}
