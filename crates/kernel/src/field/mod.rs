//! Field types.
//!
//! Field types are the atomic building blocks of collections. Each one is a
//! [`FieldDefinition`] produced by [`define_field`] and registered in the
//! [`FieldRegistry`] during plugin registration.

mod builtin;
mod definition;
mod registry;
pub mod sanitizers;
pub mod validators;

pub use builtin::{RelationPopulator, builtin_fields};
pub use definition::{
    ConditionalLogicMatcher, ConditionalRule, DefaultValue, FieldContext, FieldDefinition,
    FieldSpec, FieldType, InputMeta, JsType, KeywordExtractor, OptionSpec, Operation,
    PopulateContext, Populator, RuleOperator, Sanitizer, Validator, default_keywords, define_field,
    is_slug, is_truthy, sanitizer, validator,
};
pub use registry::FieldRegistry;
