//! Field type definitions.
//!
//! A [`FieldDefinition`] describes one reusable field type: how values are
//! stored, defaulted, sanitized, validated, populated and indexed for search.
//! Definitions are produced by [`define_field`] and are immutable once
//! registered.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plugin::RegistrationError;
use crate::schema::DbType;
use crate::state::AppState;
use crate::store::Record;

/// Value shape seen by API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsType {
    String,
    Number,
    Boolean,
    Object,
}

impl JsType {
    /// Whether a non-null value has this shape.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            JsType::String => value.is_string(),
            JsType::Number => value.is_number(),
            JsType::Boolean => value.is_boolean(),
            JsType::Object => value.is_object() || value.is_array(),
        }
    }
}

impl fmt::Display for JsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JsType::String => "string",
            JsType::Number => "number",
            JsType::Boolean => "boolean",
            JsType::Object => "object",
        };
        f.write_str(name)
    }
}

/// The `{js, ts, db}` type triple of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldType {
    pub js: JsType,
    /// Type name emitted for generated client typings.
    pub ts: String,
    pub db: DbType,
}

impl FieldType {
    pub fn new(js: JsType, ts: impl Into<String>, db: DbType) -> Self {
        Self {
            js,
            ts: ts.into(),
            db,
        }
    }
}

impl From<JsType> for FieldType {
    fn from(js: JsType) -> Self {
        match js {
            JsType::String => FieldType::new(js, "string", DbType::Text),
            JsType::Number => FieldType::new(js, "number", DbType::Decimal),
            JsType::Boolean => FieldType::new(js, "boolean", DbType::Boolean),
            JsType::Object => FieldType::new(js, "Record<string, any>", DbType::Json),
        }
    }
}

/// One named option a field type accepts in collection definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub name: String,
    pub kind: JsType,
    #[serde(default)]
    pub required: bool,
}

impl OptionSpec {
    pub fn optional(name: impl Into<String>, kind: JsType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }

    pub fn required(name: impl Into<String>, kind: JsType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }
}

/// Input requirements that hold for every use of the field type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputMeta {
    pub required: bool,
}

/// Kind of operation an input is processed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    Update,
}

/// Context handed to sanitizers and validators.
#[derive(Debug, Clone, Copy)]
pub struct FieldContext<'a> {
    pub collection: &'a str,
    pub field: &'a str,
    /// Per-collection options of this field.
    pub options: &'a Value,
    pub language: &'a str,
    pub operation: Operation,
    /// The whole input record being processed.
    pub input: &'a Record,
}

/// Comparison used by a conditional logic rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOperator {
    Eq,
    Ne,
    Truthy,
    Falsy,
    In,
}

/// Retain a field only when a sibling value matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalRule {
    pub field: String,
    pub operator: RuleOperator,
    #[serde(default)]
    pub value: Value,
}

impl ConditionalRule {
    pub fn matches(&self, input: &Record) -> bool {
        let sibling = input.get(&self.field).unwrap_or(&Value::Null);
        match self.operator {
            RuleOperator::Eq => sibling == &self.value,
            RuleOperator::Ne => sibling != &self.value,
            RuleOperator::Truthy => is_truthy(sibling),
            RuleOperator::Falsy => !is_truthy(sibling),
            RuleOperator::In => self
                .value
                .as_array()
                .is_some_and(|items| items.contains(sibling)),
        }
    }
}

/// Loose truthiness: null, false, zero and "" are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Normalizes a raw value before validation.
pub type Sanitizer = Arc<dyn Fn(Value, &FieldContext<'_>) -> Value + Send + Sync>;

/// Produces the default value from the per-collection options.
pub type DefaultValue = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Turns a stored value into searchable text.
pub type KeywordExtractor = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Decides whether a field value is kept given its rules and the sibling input.
pub type ConditionalLogicMatcher = Arc<dyn Fn(&[ConditionalRule], &Record) -> bool + Send + Sync>;

/// Asserts input correctness. The error string is shown to the caller.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, value: &Value, ctx: &FieldContext<'_>) -> Result<(), String>;
}

struct FnValidator<F>(F);

#[async_trait]
impl<F> Validator for FnValidator<F>
where
    F: Fn(&Value, &FieldContext<'_>) -> Result<(), String> + Send + Sync,
{
    async fn validate(&self, value: &Value, ctx: &FieldContext<'_>) -> Result<(), String> {
        (self.0)(value, ctx)
    }
}

/// Wrap a synchronous function as a [`Validator`].
pub fn validator<F>(f: F) -> Arc<dyn Validator>
where
    F: Fn(&Value, &FieldContext<'_>) -> Result<(), String> + Send + Sync + 'static,
{
    Arc::new(FnValidator(f))
}

/// Wrap a function as a [`Sanitizer`].
pub fn sanitizer<F>(f: F) -> Sanitizer
where
    F: Fn(Value, &FieldContext<'_>) -> Value + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Context handed to populators.
#[derive(Clone, Copy)]
pub struct PopulateContext<'a> {
    pub state: &'a AppState,
    pub collection: &'a str,
    pub field: &'a str,
    pub options: &'a Value,
    pub language: &'a str,
}

/// Transforms a stored value into its API-facing shape.
#[async_trait]
pub trait Populator: Send + Sync {
    async fn populate(&self, value: Value, ctx: &PopulateContext<'_>) -> anyhow::Result<Value>;
}

/// A resolved field type.
#[derive(Clone)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub options: Vec<OptionSpec>,
    pub input_meta: InputMeta,
    pub default: DefaultValue,
    pub sanitizers: Vec<Sanitizer>,
    pub validators: Vec<Arc<dyn Validator>>,
    pub conditional_logic_matcher: ConditionalLogicMatcher,
    pub population: Option<Arc<dyn Populator>>,
    pub extract_keywords: KeywordExtractor,
}

impl fmt::Debug for FieldDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDefinition")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("options", &self.options)
            .field("input_meta", &self.input_meta)
            .field("sanitizers", &self.sanitizers.len())
            .field("validators", &self.validators.len())
            .field("populates", &self.population.is_some())
            .finish()
    }
}

impl FieldDefinition {
    /// Check per-collection options against the declared option specs.
    pub fn check_options(&self, options: &Value) -> Result<(), String> {
        let empty = serde_json::Map::new();
        let map = match options {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => return Err(format!("options must be an object, got {other}")),
        };

        for spec in &self.options {
            match map.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(format!("missing required option '{}'", spec.name));
                }
                Some(value) if !value.is_null() && !spec.kind.accepts(value) => {
                    return Err(format!("option '{}' must be a {}", spec.name, spec.kind));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Input to [`define_field`]. Unset hooks receive deterministic defaults.
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub options: Vec<OptionSpec>,
    pub input_meta: InputMeta,
    pub default: Option<DefaultValue>,
    pub sanitizers: Vec<Sanitizer>,
    pub validators: Vec<Arc<dyn Validator>>,
    pub conditional_logic_matcher: Option<ConditionalLogicMatcher>,
    pub population: Option<Arc<dyn Populator>>,
    pub extract_keywords: Option<KeywordExtractor>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: impl Into<FieldType>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            options: Vec::new(),
            input_meta: InputMeta::default(),
            default: None,
            sanitizers: Vec::new(),
            validators: Vec::new(),
            conditional_logic_matcher: None,
            population: None,
            extract_keywords: None,
        }
    }

    pub fn option(mut self, spec: OptionSpec) -> Self {
        self.options.push(spec);
        self
    }

    /// Require a value wherever this field type is used.
    pub fn required(mut self) -> Self {
        self.input_meta.required = true;
        self
    }

    pub fn default_value(
        mut self,
        f: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.default = Some(Arc::new(f));
        self
    }

    pub fn sanitizer(mut self, s: Sanitizer) -> Self {
        self.sanitizers.push(s);
        self
    }

    pub fn validator(mut self, v: Arc<dyn Validator>) -> Self {
        self.validators.push(v);
        self
    }

    pub fn conditional_logic(
        mut self,
        f: impl Fn(&[ConditionalRule], &Record) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.conditional_logic_matcher = Some(Arc::new(f));
        self
    }

    pub fn populate(mut self, p: Arc<dyn Populator>) -> Self {
        self.population = Some(p);
        self
    }

    pub fn keywords(mut self, f: impl Fn(&Value) -> String + Send + Sync + 'static) -> Self {
        self.extract_keywords = Some(Arc::new(f));
        self
    }
}

/// Option value when set, otherwise null.
fn option_default(options: &Value) -> Value {
    options.get("default").cloned().unwrap_or(Value::Null)
}

fn all_rules_match(rules: &[ConditionalRule], input: &Record) -> bool {
    rules.iter().all(|rule| rule.matches(input))
}

/// Stringify objects, pass strings through, empty out nulls.
pub fn default_keywords(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whether `name` is a lowercase URL-safe slug.
pub fn is_slug(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--")
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Resolve a [`FieldSpec`] into a [`FieldDefinition`].
pub fn define_field(spec: FieldSpec) -> Result<FieldDefinition, RegistrationError> {
    if !is_slug(&spec.name) {
        return Err(RegistrationError::InvalidFieldName(spec.name));
    }

    Ok(FieldDefinition {
        name: spec.name,
        field_type: spec.field_type,
        options: spec.options,
        input_meta: spec.input_meta,
        default: spec.default.unwrap_or_else(|| Arc::new(option_default)),
        sanitizers: spec.sanitizers,
        validators: spec.validators,
        conditional_logic_matcher: spec
            .conditional_logic_matcher
            .unwrap_or_else(|| Arc::new(all_rules_match)),
        population: spec.population,
        extract_keywords: spec
            .extract_keywords
            .unwrap_or_else(|| Arc::new(default_keywords)),
    })
}
