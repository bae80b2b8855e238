//! Vellum test utilities.
//!
//! Helpers for integration testing: record fixtures, user and post builders,
//! and assertion utilities for records and validation errors.

use serde_json::{Map, Value, json};
use uuid::Uuid;

/// A record as the kernel stores it.
pub type Record = Map<String, Value>;

/// Build a record from a JSON object literal. Anything else yields an empty
/// record.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

/// A unique email address for a test user.
pub fn unique_email() -> String {
    format!("user-{}@example.test", Uuid::now_v7().simple())
}

/// Create a test user input with a unique email.
pub fn test_user(password: &str) -> TestUser {
    TestUser {
        email: unique_email(),
        password: password.to_string(),
        first_name: None,
        is_active: true,
        is_admin: false,
    }
}

/// A user input builder.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub is_active: bool,
    pub is_admin: bool,
}

impl TestUser {
    pub fn with_email(mut self, email: &str) -> Self {
        self.email = email.to_string();
        self
    }

    pub fn with_first_name(mut self, name: &str) -> Self {
        self.first_name = Some(name.to_string());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    /// The create input for the `users` collection.
    pub fn input(&self) -> Record {
        let mut input = record(json!({
            "email": self.email,
            "password": self.password,
            "is_active": self.is_active,
            "is_admin": self.is_admin,
        }));
        if let Some(name) = &self.first_name {
            input.insert("first_name".into(), Value::from(name.as_str()));
        }
        input
    }
}

/// Create a blog post input.
pub fn test_post(title: &str) -> TestPost {
    TestPost {
        title: title.to_string(),
        slug: slugify(title),
        fields: Record::new(),
    }
}

/// A post input builder.
#[derive(Debug, Clone)]
pub struct TestPost {
    pub title: String,
    pub slug: String,
    pub fields: Record,
}

impl TestPost {
    pub fn with_slug(mut self, slug: &str) -> Self {
        self.slug = slug.to_string();
        self
    }

    /// Add any other field.
    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn published(self) -> Self {
        self.with_field("published", Value::Bool(true))
    }

    pub fn in_language(self, language: &str) -> Self {
        self.with_field("language", Value::from(language))
    }

    pub fn input(&self) -> Record {
        let mut input = self.fields.clone();
        input.insert("title".into(), Value::from(self.title.as_str()));
        input.insert("slug".into(), Value::from(self.slug.as_str()));
        input
    }
}

fn slugify(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Assertion helpers for records and error maps.
pub mod assert {
    use serde_json::Value;

    use super::Record;

    /// Assert that a record has a field with the expected value.
    pub fn field_eq(record: &Record, field: &str, expected: &Value) {
        assert_eq!(
            record.get(field),
            Some(expected),
            "Expected field '{field}' to be {expected}, record: {}",
            Value::Object(record.clone())
        );
    }

    /// Assert that a record lacks a field.
    pub fn lacks_field(record: &Record, field: &str) {
        assert!(
            !record.contains_key(field),
            "Expected record to lack '{field}', record: {}",
            Value::Object(record.clone())
        );
    }

    /// Assert that a serialized error map names a field.
    pub fn error_on(errors: &Value, field: &str) {
        assert!(
            errors.get(field).is_some(),
            "Expected an error on '{field}', got: {errors}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_input_has_every_flag() {
        let user = test_user("hunter2hunter2").with_first_name("Ada").admin();
        let input = user.input();
        assert_eq!(input["password"], "hunter2hunter2");
        assert_eq!(input["first_name"], "Ada");
        assert_eq!(input["is_admin"], true);
        assert!(input["email"].as_str().is_some_and(|e| e.ends_with("@example.test")));
    }

    #[test]
    fn emails_are_unique() {
        assert_ne!(unique_email(), unique_email());
    }

    #[test]
    fn post_slug_follows_title() {
        let post = test_post("Hello, World!").published().in_language("fr");
        let input = post.input();
        assert_eq!(input["slug"], "hello-world");
        assert_eq!(input["published"], true);
        assert_eq!(input["language"], "fr");
    }

    #[test]
    fn record_accepts_only_objects() {
        assert!(record(json!([1, 2])).is_empty());
        let r = record(json!({"a": 1}));
        assert::field_eq(&r, "a", &json!(1));
        assert::lacks_field(&r, "b");
        assert::error_on(&json!({"a": "bad"}), "a");
    }
}
