//! Logical validity windows carried inside payloads.
//!
//! A node may hold `date_from`/`date_to` fields describing the business
//! period a version is valid for. This is independent of the physical
//! snapshot sequence and of the schema version: closing one logical version
//! and opening the next are two ordinary appends.

use chrono::{DateTime, Utc};

use crate::value::{FieldType, FieldValue, Payload};

pub const ID_FIELD: &str = "id";
pub const DATE_FROM: &str = "date_from";
pub const DATE_TO: &str = "date_to";

/// Bookkeeping fields that are never treated as unknown by validation.
pub const RESERVED_FIELDS: [&str; 3] = [ID_FIELD, DATE_FROM, DATE_TO];

pub fn is_reserved_field(name: &str) -> bool {
    RESERVED_FIELDS.contains(&name)
}

/// `[from, to)` window read from a payload. A missing `date_from` means
/// "since forever", a missing or null `date_to` means "still open".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ValidityWindow {
    pub fn of(payload: &Payload) -> Self {
        Self {
            from: instant(payload.get(DATE_FROM)),
            to: instant(payload.get(DATE_TO)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.to.is_none()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| from <= at) && self.to.is_none_or(|to| at < to)
    }
}

/// True while the payload's logical version has not been closed.
pub fn is_active(payload: &Payload) -> bool {
    payload.get(DATE_TO).is_none_or(FieldValue::is_null)
}

/// Stamp a fresh open window starting at `now`.
pub fn open(payload: &mut Payload, now: DateTime<Utc>) {
    payload.insert(DATE_FROM.into(), FieldValue::DateTime(now));
    payload.insert(DATE_TO.into(), FieldValue::Null);
}

/// Close the window at `now`.
pub fn close(payload: &mut Payload, now: DateTime<Utc>) {
    payload.insert(DATE_TO.into(), FieldValue::DateTime(now));
}

fn instant(value: Option<&FieldValue>) -> Option<DateTime<Utc>> {
    match value?.convert_to(FieldType::DateTime).ok()? {
        FieldValue::DateTime(dt) => Some(dt),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_window_bounds() {
        let now = Utc::now();
        let mut payload = Payload::new();
        open(&mut payload, now);
        assert!(is_active(&payload));
        assert!(ValidityWindow::of(&payload).contains(now));
        assert!(!ValidityWindow::of(&payload).contains(now - Duration::seconds(1)));

        close(&mut payload, now + Duration::hours(1));
        let window = ValidityWindow::of(&payload);
        assert!(!is_active(&payload));
        assert!(window.contains(now + Duration::minutes(59)));
        assert!(!window.contains(now + Duration::hours(1)));
    }

    #[test]
    fn test_string_dates_from_json_are_understood() {
        let mut payload = Payload::new();
        payload.insert(DATE_FROM.into(), FieldValue::from("2024-01-01T00:00:00Z"));
        payload.insert(DATE_TO.into(), FieldValue::from("2024-02-01"));
        let window = ValidityWindow::of(&payload);
        assert!(window.from.is_some());
        assert!(window.to.is_some());
    }
}
