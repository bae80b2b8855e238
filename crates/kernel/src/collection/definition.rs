//! Collection definitions as declared by plugins.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::field::ConditionalRule;

/// Field storing a public page's URL path.
pub const PATH_FIELD: &str = "path";

/// Switch deciding whether a page is publicly visible.
pub const PUBLIC_FIELD: &str = "public";

/// Secret that unlocks a non-public page for previews.
pub const DRAFT_TOKEN_FIELD: &str = "draft_token";

/// Whether a collection holds one record (per language) or many.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionMode {
    Single,
    #[default]
    Multiple,
}

/// Scope of a uniqueness constraint on translatable collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UniqueScope {
    /// Unique among records of the same language.
    PerLanguage,
    /// Unique across every language.
    AllLanguages,
}

/// Per-collection settings of one field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldAdditional {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: Option<UniqueScope>,
    /// Non-unique lookup index.
    #[serde(default)]
    pub index: bool,
    #[serde(default)]
    pub conditional_logic: Vec<ConditionalRule>,
}

/// A field as used by one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionField {
    pub name: String,
    /// Name of the registered field type.
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub additional: FieldAdditional,
}

impl CollectionField {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            options: Value::Null,
            additional: FieldAdditional::default(),
        }
    }

    pub fn options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    pub fn required(mut self) -> Self {
        self.additional.required = true;
        self
    }

    pub fn unique(mut self, scope: UniqueScope) -> Self {
        self.additional.unique = Some(scope);
        self
    }

    pub fn indexed(mut self) -> Self {
        self.additional.index = true;
        self
    }

    pub fn conditional(mut self, rule: ConditionalRule) -> Self {
        self.additional.conditional_logic.push(rule);
        self
    }
}

/// A content type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDefinition {
    pub name: String,
    #[serde(default)]
    pub mode: CollectionMode,
    pub fields: Vec<CollectionField>,
    /// Records are per-language rows linked by a translation group id.
    #[serde(default)]
    pub translatable: bool,
    #[serde(default = "default_true")]
    pub timestamps: bool,
    /// Adds the standard path, public and draft token fields.
    #[serde(default)]
    pub public_pages: bool,
    /// Fields whose keywords feed the search column.
    #[serde(default)]
    pub search: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl CollectionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: CollectionMode::Multiple,
            fields: Vec::new(),
            translatable: false,
            timestamps: true,
            public_pages: false,
            search: Vec::new(),
        }
    }

    pub fn field(mut self, field: CollectionField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn single(mut self) -> Self {
        self.mode = CollectionMode::Single;
        self
    }

    pub fn translatable(mut self) -> Self {
        self.translatable = true;
        self
    }

    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    pub fn public_pages(mut self) -> Self {
        self.public_pages = true;
        self
    }

    pub fn search<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// Whether `name` is usable as a table or column name.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
