//! Field types shipped with the kernel.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::definition::{
    FieldDefinition, FieldSpec, FieldType, JsType, OptionSpec, PopulateContext, Populator,
    define_field,
};
use super::{sanitizers, validators};
use crate::plugin::RegistrationError;
use crate::query::Filter;
use crate::schema::{DbType, ID_COLUMN};

/// Resolves a stored record id into the referenced record.
///
/// The target collection comes from the `collection` option. Referenced
/// records are returned unpopulated so relation cycles terminate.
pub struct RelationPopulator;

#[async_trait]
impl Populator for RelationPopulator {
    async fn populate(&self, value: Value, ctx: &PopulateContext<'_>) -> anyhow::Result<Value> {
        let target = ctx
            .options
            .get("collection")
            .and_then(Value::as_str)
            .with_context(|| format!("relation field '{}' has no target collection", ctx.field))?;

        if value.is_null() {
            return Ok(Value::Null);
        }

        let record = ctx
            .state
            .query(target)?
            .where_eq(ID_COLUMN, value)
            .first()
            .await?;
        Ok(record.map(Value::Object).unwrap_or(Value::Null))
    }
}

fn text() -> Result<FieldDefinition, RegistrationError> {
    define_field(
        FieldSpec::new("text", JsType::String)
            .option(OptionSpec::optional("minLength", JsType::Number))
            .option(OptionSpec::optional("maxLength", JsType::Number))
            .sanitizer(sanitizers::trim())
            .validator(validators::type_validator(JsType::String))
            .validator(validators::bounds_validator()),
    )
}

fn number() -> Result<FieldDefinition, RegistrationError> {
    define_field(
        FieldSpec::new("number", JsType::Number)
            .option(OptionSpec::optional("min", JsType::Number))
            .option(OptionSpec::optional("max", JsType::Number))
            .sanitizer(sanitizers::to_number())
            .validator(validators::type_validator(JsType::Number))
            .validator(validators::bounds_validator()),
    )
}

fn switch() -> Result<FieldDefinition, RegistrationError> {
    define_field(
        FieldSpec::new("switch", JsType::Boolean)
            .default_value(|options| {
                options
                    .get("default")
                    .cloned()
                    .unwrap_or(Value::Bool(false))
            })
            .sanitizer(sanitizers::to_boolean())
            .validator(validators::type_validator(JsType::Boolean)),
    )
}

fn select() -> Result<FieldDefinition, RegistrationError> {
    define_field(
        FieldSpec::new("select", JsType::String)
            .option(OptionSpec::required("choices", JsType::Object))
            .sanitizer(sanitizers::trim())
            .validator(validators::choices_validator()),
    )
}

fn slug() -> Result<FieldDefinition, RegistrationError> {
    define_field(
        FieldSpec::new("slug", JsType::String)
            .sanitizer(sanitizers::trim())
            .sanitizer(sanitizers::slugify())
            .validator(validators::type_validator(JsType::String))
            .validator(validators::slug_validator()),
    )
}

fn email() -> Result<FieldDefinition, RegistrationError> {
    define_field(
        FieldSpec::new("email", JsType::String)
            .sanitizer(sanitizers::trim())
            .sanitizer(sanitizers::lowercase())
            .validator(validators::type_validator(JsType::String))
            .validator(validators::email_validator()),
    )
}

fn rich_text() -> Result<FieldDefinition, RegistrationError> {
    define_field(
        FieldSpec::new("rich-text", JsType::String)
            .sanitizer(sanitizers::clean_html())
            .validator(validators::type_validator(JsType::String))
            .keywords(|value| match value {
                Value::String(html) => strip_tags(html),
                _ => String::new(),
            }),
    )
}

fn date_time() -> Result<FieldDefinition, RegistrationError> {
    define_field(
        FieldSpec::new(
            "date-time",
            FieldType::new(JsType::Number, "number", DbType::BigInt),
        )
        .sanitizer(sanitizers::to_number())
        .validator(validators::timestamp_validator())
        .keywords(|_| String::new()),
    )
}

fn json() -> Result<FieldDefinition, RegistrationError> {
    define_field(
        FieldSpec::new("json", JsType::Object)
            .validator(validators::type_validator(JsType::Object)),
    )
}

fn relation() -> Result<FieldDefinition, RegistrationError> {
    define_field(
        FieldSpec::new("relation", JsType::String)
            .option(OptionSpec::required("collection", JsType::String))
            .validator(validators::type_validator(JsType::String))
            .populate(Arc::new(RelationPopulator))
            .keywords(|_| String::new()),
    )
}

/// Drop markup, keeping the text between tags.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Every built-in field type.
pub fn builtin_fields() -> Result<Vec<FieldDefinition>, RegistrationError> {
    Ok(vec![
        text()?,
        number()?,
        switch()?,
        select()?,
        slug()?,
        email()?,
        rich_text()?,
        date_time()?,
        json()?,
        relation()?,
    ])
}
