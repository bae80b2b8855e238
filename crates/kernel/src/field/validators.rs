//! Built-in validators.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;

use super::definition::{FieldContext, JsType, Validator, is_slug, validator};

#[allow(clippy::expect_used)]
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex literal")
});

pub const REQUIRED_MESSAGE: &str = "This field is required";

/// Whether a value counts as present for `required` fields.
///
/// Null, an empty array, `false`, a non-finite number and an empty string
/// are all missing.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(f64::is_finite),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

pub fn required_validator() -> Arc<dyn Validator> {
    validator(|value, _ctx| {
        if is_present(value) {
            Ok(())
        } else {
            Err(REQUIRED_MESSAGE.to_string())
        }
    })
}

/// Non-null values must have the given shape.
pub fn type_validator(js: JsType) -> Arc<dyn Validator> {
    validator(move |value, _ctx| {
        if value.is_null() || js.accepts(value) {
            Ok(())
        } else {
            Err(format!("Expected a {js} value"))
        }
    })
}

fn option_f64(ctx: &FieldContext<'_>, key: &str) -> Option<f64> {
    ctx.options.get(key).and_then(Value::as_f64)
}

/// `min`/`max` bounds for numbers, `minLength`/`maxLength` for strings.
pub fn bounds_validator() -> Arc<dyn Validator> {
    validator(|value, ctx| {
        match value {
            Value::Number(n) => {
                let n = n.as_f64().unwrap_or_default();
                if let Some(min) = option_f64(ctx, "min")
                    && n < min
                {
                    return Err(format!("Must be at least {min}"));
                }
                if let Some(max) = option_f64(ctx, "max")
                    && n > max
                {
                    return Err(format!("Must be at most {max}"));
                }
            }
            Value::String(s) => {
                let len = s.chars().count() as f64;
                if let Some(min) = option_f64(ctx, "minLength")
                    && len < min
                {
                    return Err(format!("Must be at least {min} characters"));
                }
                if let Some(max) = option_f64(ctx, "maxLength")
                    && len > max
                {
                    return Err(format!("Must be at most {max} characters"));
                }
            }
            _ => {}
        }
        Ok(())
    })
}

pub fn email_validator() -> Arc<dyn Validator> {
    validator(|value, _ctx| match value {
        Value::String(s) if !s.is_empty() && !EMAIL.is_match(s) => {
            Err("Invalid email address".to_string())
        }
        _ => Ok(()),
    })
}

pub fn slug_validator() -> Arc<dyn Validator> {
    validator(|value, _ctx| match value {
        Value::String(s) if !s.is_empty() && !is_slug(s) => {
            Err("Only lowercase letters, digits and dashes are allowed".to_string())
        }
        _ => Ok(()),
    })
}

/// Allowed values from the `choices` option. Each choice is either a bare
/// value or an object with a `value` key.
pub fn choice_values(options: &Value) -> Vec<Value> {
    options
        .get("choices")
        .and_then(Value::as_array)
        .map(|choices| {
            choices
                .iter()
                .map(|c| c.get("value").cloned().unwrap_or_else(|| c.clone()))
                .collect()
        })
        .unwrap_or_default()
}

pub fn choices_validator() -> Arc<dyn Validator> {
    validator(|value, ctx| {
        if !is_present(value) || choice_values(ctx.options).contains(value) {
            Ok(())
        } else {
            Err("Invalid choice".to_string())
        }
    })
}

/// Whole milliseconds since the Unix epoch.
pub fn timestamp_validator() -> Arc<dyn Validator> {
    validator(|value, _ctx| match value {
        Value::Null => Ok(()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
        _ => Err("Expected a timestamp in milliseconds".to_string()),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::field::Operation;
    use crate::store::Record;
    use serde_json::json;

    async fn run(v: &Arc<dyn Validator>, value: Value, options: Value) -> Result<(), String> {
        let input = Record::new();
        let ctx = FieldContext {
            collection: "posts",
            field: "f",
            options: &options,
            language: "en",
            operation: Operation::Create,
            input: &input,
        };
        v.validate(&value, &ctx).await
    }

    #[tokio::test]
    async fn required_rejects_empty_values() {
        let v = required_validator();
        for missing in [Value::Null, json!([]), json!(false), json!("")] {
            assert!(run(&v, missing.clone(), Value::Null).await.is_err(), "{missing}");
        }
        for present in [json!(0), json!(true), json!("x"), json!([1]), json!({})] {
            assert!(run(&v, present.clone(), Value::Null).await.is_ok(), "{present}");
        }
    }

    #[test]
    fn required_false_fails() {
        assert!(!is_present(&json!(false)));
    }

    #[tokio::test]
    async fn bounds() {
        let v = bounds_validator();
        let opts = json!({"min": 1, "max": 10, "maxLength": 3});
        assert!(run(&v, json!(0), opts.clone()).await.is_err());
        assert!(run(&v, json!(5), opts.clone()).await.is_ok());
        assert!(run(&v, json!(11), opts.clone()).await.is_err());
        assert!(run(&v, json!("abcd"), opts.clone()).await.is_err());
        assert!(run(&v, json!("abc"), opts).await.is_ok());
    }

    #[tokio::test]
    async fn email_and_slug() {
        assert!(run(&email_validator(), json!("a@b.co"), Value::Null).await.is_ok());
        assert!(run(&email_validator(), json!("nope"), Value::Null).await.is_err());
        assert!(run(&slug_validator(), json!("a-b"), Value::Null).await.is_ok());
        assert!(run(&slug_validator(), json!("A B"), Value::Null).await.is_err());
    }

    #[tokio::test]
    async fn choices() {
        let v = choices_validator();
        let opts = json!({"choices": [{"label": "News", "value": "news"}, "misc"]});
        assert!(run(&v, json!("news"), opts.clone()).await.is_ok());
        assert!(run(&v, json!("misc"), opts.clone()).await.is_ok());
        assert!(run(&v, json!(""), opts.clone()).await.is_ok());
        assert!(run(&v, json!("other"), opts).await.is_err());
    }

    #[tokio::test]
    async fn type_check_ignores_null() {
        let v = type_validator(JsType::Number);
        assert!(run(&v, Value::Null, Value::Null).await.is_ok());
        assert!(run(&v, json!("1"), Value::Null).await.is_err());
    }
}
