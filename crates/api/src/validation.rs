//! Declarative body validation.
//!
//! Request DTOs implement [`Validate`]; the pipeline's validate guard decodes
//! the body (rejecting unknown fields through serde) and then runs these
//! checks, collecting every failing field rather than stopping at the first.

use serde::Serialize;

/// A single failing field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Collection of field validation errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub fields: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fails if `value` is blank.
    pub fn required(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.add(field, "is required");
        }
        self
    }

    /// Fails if `value` is shorter than `min` characters. Blank values are
    /// left to [`required`](Self::required).
    pub fn min_len(&mut self, field: &str, value: &str, min: usize) -> &mut Self {
        if !value.is_empty() && value.chars().count() < min {
            self.add(field, format!("must be at least {min} characters"));
        }
        self
    }

    /// Fails if a non-blank `value` is not shaped like an email address.
    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        if !value.is_empty() && !looks_like_email(value) {
            self.add(field, "must be a valid email address");
        }
        self
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Field constraints for a decoded request body.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationErrors>;
}

/// `local@domain.tld`, no whitespace, exactly one `@`.
fn looks_like_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty() && !host.starts_with('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(looks_like_email("a@b.com"));
        assert!(looks_like_email("first.last@sub.example.org"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("@b.com"));
        assert!(!looks_like_email("a@@b.com"));
        assert!(!looks_like_email("a b@c.com"));
    }

    #[test]
    fn collects_every_failing_field() {
        let mut errors = ValidationErrors::new();
        errors
            .required("email", "")
            .email("email", "")
            .required("password", "short")
            .min_len("password", "short", 8)
            .min_len("username", "x", 2);

        let err = errors.into_result().unwrap_err();
        let fields: Vec<&str> = err.fields.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, vec!["email", "password", "username"]);
    }
}
