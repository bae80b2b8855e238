//! Built-in sanitizers. Each one leaves values it does not understand alone.

use serde_json::{Number, Value};

use super::definition::{Sanitizer, sanitizer};

/// Trim surrounding whitespace from strings.
pub fn trim() -> Sanitizer {
    sanitizer(|value, _ctx| match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other,
    })
}

pub fn lowercase() -> Sanitizer {
    sanitizer(|value, _ctx| match value {
        Value::String(s) => Value::String(s.to_lowercase()),
        other => other,
    })
}

/// Parse numeric strings. Blank strings become null.
pub fn to_number() -> Sanitizer {
    sanitizer(|value, _ctx| match value {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Value::Null;
            }
            if let Ok(i) = s.parse::<i64>() {
                return Value::Number(i.into());
            }
            s.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(s.to_string()))
        }
        other => other,
    })
}

/// Accept common form encodings of booleans.
pub fn to_boolean() -> Sanitizer {
    sanitizer(|value, _ctx| match value {
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Value::Bool(true),
            "false" | "0" | "off" | "no" | "" => Value::Bool(false),
            _ => Value::String(s),
        },
        Value::Number(n) if n.as_f64() == Some(0.0) => Value::Bool(false),
        Value::Number(n) if n.as_f64() == Some(1.0) => Value::Bool(true),
        other => other,
    })
}

/// Lowercase, replace runs of non-alphanumerics with single dashes.
pub fn slugify_str(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

pub fn slugify() -> Sanitizer {
    sanitizer(|value, _ctx| match value {
        Value::String(s) => Value::String(slugify_str(&s)),
        other => other,
    })
}

/// Strip unsafe markup from HTML.
pub fn clean_html() -> Sanitizer {
    sanitizer(|value, _ctx| match value {
        Value::String(s) => Value::String(ammonia::clean(&s)),
        other => other,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::field::{FieldContext, Operation};
    use crate::store::Record;
    use serde_json::json;

    fn apply(s: &Sanitizer, value: Value, options: Value) -> Value {
        let input = Record::new();
        let ctx = FieldContext {
            collection: "posts",
            field: "f",
            options: &options,
            language: "en",
            operation: Operation::Create,
            input: &input,
        };
        s(value, &ctx)
    }

    #[test]
    fn numbers_and_booleans() {
        assert_eq!(apply(&to_number(), json!(" 42 "), Value::Null), json!(42));
        assert_eq!(apply(&to_number(), json!("1.5"), Value::Null), json!(1.5));
        assert_eq!(apply(&to_number(), json!(""), Value::Null), Value::Null);
        assert_eq!(apply(&to_number(), json!("abc"), Value::Null), json!("abc"));
        assert_eq!(apply(&to_boolean(), json!("on"), Value::Null), json!(true));
        assert_eq!(apply(&to_boolean(), json!(0), Value::Null), json!(false));
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify_str("Hello, World!"), "hello-world");
        assert_eq!(slugify_str("  --Rust  2024-- "), "rust-2024");
        assert_eq!(slugify_str("***"), "");
    }

    #[test]
    fn html_is_cleaned() {
        let out = apply(
            &clean_html(),
            json!("<p>ok</p><script>alert(1)</script>"),
            Value::Null,
        );
        assert_eq!(out, json!("<p>ok</p>"));
    }
}
