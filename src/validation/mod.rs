/// Request validation
///
/// Collects field-level errors keyed by field name. The first message
/// recorded for a field wins; later failures on the same field are ignored.
use crate::error::{ApiError, ApiResult};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

/// Field name to error message
pub type FieldErrors = BTreeMap<String, String>;

lazy_static! {
    pub static ref EMAIL_RX: Regex =
        Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$")
            .expect("email pattern compiles");
}

/// Field error accumulator
#[derive(Debug, Default)]
pub struct Validator {
    errors: FieldErrors,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, key: &str, message: &str) {
        self.errors
            .entry(key.to_string())
            .or_insert_with(|| message.to_string());
    }

    /// Record `message` against `key` unless `ok` holds
    pub fn check(&mut self, ok: bool, key: &str, message: &str) {
        if !ok {
            self.add_error(key, message);
        }
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    /// Turn accumulated errors into a 422
    pub fn into_result(self) -> ApiResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self.errors))
        }
    }
}

pub fn permitted_value<T: PartialEq>(value: &T, permitted: &[T]) -> bool {
    permitted.contains(value)
}

pub fn matches(value: &str, rx: &Regex) -> bool {
    rx.is_match(value)
}

/// True when no element appears twice
pub fn unique<T: Eq + Hash>(values: &[T]) -> bool {
    let mut seen = HashSet::with_capacity(values.len());
    values.iter().all(|v| seen.insert(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_wins() {
        let mut v = Validator::new();
        v.check(false, "title", "must be provided");
        v.check(false, "title", "must not be more than 500 bytes long");
        assert!(!v.is_valid());
        assert_eq!(v.errors()["title"], "must be provided");
    }

    #[test]
    fn test_into_result() {
        assert!(Validator::new().into_result().is_ok());

        let mut v = Validator::new();
        v.add_error("email", "must be a valid email address");
        match v.into_result() {
            Err(ApiError::Validation(fields)) => assert!(fields.contains_key("email")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_helpers() {
        assert!(unique(&["drama", "comedy"]));
        assert!(!unique(&["drama", "drama"]));
        assert!(permitted_value(&"id", &["id", "-id"]));
        assert!(!permitted_value(&"name", &["id", "-id"]));
        assert!(matches("alice@example.com", &EMAIL_RX));
        assert!(!matches("alice@example", &EMAIL_RX));
        assert!(!matches("not an email", &EMAIL_RX));
    }
}
