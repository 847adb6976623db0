//! DTO field validator (spec §9 "Dynamic typing / reflection in
//! validation"). Generalizes the teacher's config-level, accumulate-errors
//! `ValidationResult` (`config/validation.rs`) from gateway route checks to
//! per-field DTO validation, producing the `fields` map the error envelope
//! carries for `Validation` errors.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::RuntimeError;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$").unwrap()
});

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Accumulates per-field validation errors, then yields a single
/// `RuntimeError::validation` with all of them at once (spec §7
/// "Validation errors list every failing field").
#[derive(Debug, Default)]
pub struct Validator {
    fields: std::collections::HashMap<String, String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.fields.entry(field.to_string()).or_insert_with(|| message.into());
    }

    pub fn require_non_empty(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.fail(field, "is required");
        }
        self
    }

    pub fn string_len(&mut self, field: &str, value: &str, min: usize, max: usize) -> &mut Self {
        let len = value.chars().count();
        if len < min || len > max {
            self.fail(field, format!("must be between {min} and {max} characters"));
        }
        self
    }

    pub fn range_i64(&mut self, field: &str, value: i64, min: i64, max: i64) -> &mut Self {
        if value < min || value > max {
            self.fail(field, format!("must be between {min} and {max}"));
        }
        self
    }

    pub fn range_f64(&mut self, field: &str, value: f64, min: f64, max: f64) -> &mut Self {
        if value < min || value > max {
            self.fail(field, format!("must be between {min} and {max}"));
        }
        self
    }

    pub fn uuid(&mut self, field: &str, value: &str) -> &mut Self {
        if !UUID_RE.is_match(value) {
            self.fail(field, "must be a valid UUID");
        }
        self
    }

    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        if !EMAIL_RE.is_match(value) {
            self.fail(field, "must be a valid email address");
        }
        self
    }

    pub fn one_of(&mut self, field: &str, value: &str, allowed: &[&str]) -> &mut Self {
        if !allowed.contains(&value) {
            self.fail(field, format!("must be one of: {}", allowed.join(", ")));
        }
        self
    }

    pub fn is_valid(&self) -> bool {
        self.fields.is_empty()
    }

    /// Consumes the validator, returning `Ok(())` if no field failed, or a
    /// `RuntimeError::validation` carrying every failure otherwise.
    pub fn finish(self) -> Result<(), RuntimeError> {
        if self.fields.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::validation(self.fields))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_every_failing_field() {
        let mut v = Validator::new();
        v.require_non_empty("name", "").range_i64("quantity", 0, 1, 100);
        let err = v.finish().unwrap_err();
        assert_eq!(err.fields.as_ref().unwrap().len(), 2);
        assert!(err.fields.as_ref().unwrap().contains_key("name"));
        assert!(err.fields.as_ref().unwrap().contains_key("quantity"));
    }

    #[test]
    fn valid_input_passes() {
        let mut v = Validator::new();
        v.require_non_empty("name", "cart")
            .range_i64("quantity", 5, 1, 100)
            .uuid("product_id", "550e8400-e29b-41d4-a716-446655440000")
            .one_of("role", "admin", &["admin", "user"]);
        assert!(v.is_valid());
        assert!(v.finish().is_ok());
    }

    #[test]
    fn rejects_malformed_uuid_and_email() {
        let mut v = Validator::new();
        v.uuid("id", "not-a-uuid").email("email", "not-an-email");
        let err = v.finish().unwrap_err();
        assert_eq!(err.fields.unwrap().len(), 2);
    }
}
