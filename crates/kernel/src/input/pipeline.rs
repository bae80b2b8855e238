//! Per-field sanitize/validate pipeline.
//!
//! Every field is processed independently so the caller gets the first error
//! of each field in one pass. Within a field, sanitizers run in order, then
//! `required`, then validators in order, then uniqueness; the first failure
//! ends that field.

use std::borrow::Cow;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::ValidationError;
use crate::collection::{CompiledCollection, CompiledField, UniqueScope};
use crate::field::validators::{REQUIRED_MESSAGE, is_present};
use crate::field::{FieldContext, Operation};
use crate::query::{Filter, MutationError, QueryBuilder, QueryError};
use crate::schema::{ID_COLUMN, LANGUAGE_COLUMN};
use crate::state::AppState;
use crate::store::Record;

pub const UNIQUE_MESSAGE: &str = "This value is already in use";
pub const UNKNOWN_FIELD_MESSAGE: &str = "Unknown field";
pub const AMBIGUOUS_UNIQUE_MESSAGE: &str = "A unique value cannot be set on more than one record";

/// Input processing for one collection and operation.
pub struct InputPipeline<'a> {
    state: &'a AppState,
    collection: &'a Arc<CompiledCollection>,
    operation: Operation,
    language: &'a str,
}

impl<'a> InputPipeline<'a> {
    pub fn new(
        state: &'a AppState,
        collection: &'a Arc<CompiledCollection>,
        operation: Operation,
        language: &'a str,
    ) -> Self {
        Self {
            state,
            collection,
            operation,
            language,
        }
    }

    /// Sanitize and validate one input record.
    ///
    /// `batch` holds already processed siblings of a multi-record create.
    /// `subject` is the query an update applies to.
    ///
    /// On create, missing fields get their defaults. On update only the
    /// provided fields are processed and returned.
    pub async fn process(
        &self,
        input: &Record,
        batch: &[Record],
        subject: Option<&QueryBuilder>,
    ) -> Result<Record, MutationError> {
        let mut errors = ValidationError::new();
        let mut output = Record::new();

        for key in input.keys() {
            if self.collection.field(key).is_none() {
                errors.insert(key.as_str(), UNKNOWN_FIELD_MESSAGE);
            }
        }

        let siblings = self.rule_context(input, subject).await?;

        for field in &self.collection.fields {
            let raw = match (input.get(&field.name), self.operation) {
                (Some(value), _) => value.clone(),
                (None, Operation::Create) => field.default_value(),
                (None, _) => continue,
            };

            let matcher = &field.definition.conditional_logic_matcher;
            let rules_fail = match &siblings {
                _ if field.conditional_logic.is_empty() => false,
                Some(siblings) => !matcher(&field.conditional_logic, siblings),
                // Several subjects: rules over unchanged siblings cannot be judged.
                None => {
                    field
                        .conditional_logic
                        .iter()
                        .all(|rule| input.contains_key(&rule.field))
                        && !matcher(&field.conditional_logic, input)
                }
            };
            if rules_fail {
                output.insert(field.name.clone(), field.default_value());
                continue;
            }

            let ctx = FieldContext {
                collection: self.collection.name(),
                field: &field.name,
                options: &field.options,
                language: self.language,
                operation: self.operation,
                input,
            };

            let value = field
                .definition
                .sanitizers
                .iter()
                .fold(raw, |value, sanitize| sanitize(value, &ctx));

            match self.validate(field, &value, &ctx, batch, subject).await? {
                Some(message) => errors.insert(field.name.as_str(), message),
                None => {
                    output.insert(field.name.clone(), value);
                }
            }
        }

        if errors.is_empty() {
            Ok(output)
        } else {
            debug!(
                collection = %self.collection.name(),
                fields = ?errors.fields(),
                "input rejected"
            );
            Err(MutationError::Validation(errors))
        }
    }

    /// The record conditional rules are judged against.
    ///
    /// An update only carries the changed keys, so a single subject's stored
    /// values fill in the rest. `None` when an update has several subjects.
    async fn rule_context<'r>(
        &self,
        input: &'r Record,
        subject: Option<&QueryBuilder>,
    ) -> Result<Option<Cow<'r, Record>>, QueryError> {
        let Some(subject) = subject.filter(|_| self.operation == Operation::Update) else {
            return Ok(Some(Cow::Borrowed(input)));
        };
        let conditional = self
            .collection
            .fields
            .iter()
            .any(|field| !field.conditional_logic.is_empty() && input.contains_key(&field.name));
        if !conditional {
            return Ok(Some(Cow::Borrowed(input)));
        }

        let mut stored = subject.clone().fetch_raw(None).await?;
        match stored.len() {
            0 => Ok(Some(Cow::Borrowed(input))),
            1 => {
                let mut merged = stored.remove(0);
                merged.extend(input.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(Some(Cow::Owned(merged)))
            }
            _ => Ok(None),
        }
    }

    async fn validate(
        &self,
        field: &CompiledField,
        value: &Value,
        ctx: &FieldContext<'_>,
        batch: &[Record],
        subject: Option<&QueryBuilder>,
    ) -> Result<Option<String>, QueryError> {
        if field.required && !is_present(value) {
            return Ok(Some(REQUIRED_MESSAGE.to_string()));
        }

        for validator in &field.definition.validators {
            if let Err(message) = validator.validate(value, ctx).await {
                return Ok(Some(message));
            }
        }

        if field.unique.is_none() || self.operation == Operation::Read || value.is_null() {
            return Ok(None);
        }

        match (self.operation, subject) {
            (Operation::Update, Some(subject)) => {
                self.unique_on_update(field, value, subject).await
            }
            _ => self.unique_on_create(field, value, batch).await,
        }
    }

    /// Uniqueness is per language unless the scope says otherwise.
    fn is_language_scoped(&self, field: &CompiledField) -> bool {
        self.collection.is_translatable() && field.unique == Some(UniqueScope::PerLanguage)
    }

    async fn unique_on_create(
        &self,
        field: &CompiledField,
        value: &Value,
        batch: &[Record],
    ) -> Result<Option<String>, QueryError> {
        let scoped = self.is_language_scoped(field);

        let clashes_in_batch = batch.iter().any(|sibling| {
            let sibling_language = sibling
                .get(LANGUAGE_COLUMN)
                .and_then(Value::as_str)
                .unwrap_or(self.language);
            sibling.get(&field.name) == Some(value)
                && (!scoped || sibling_language == self.language)
        });
        if clashes_in_batch {
            return Ok(Some(UNIQUE_MESSAGE.to_string()));
        }

        let mut query = QueryBuilder::new(self.state.clone(), Arc::clone(self.collection))
            .where_eq(&field.name, value.clone());
        if scoped {
            query = query.language(self.language);
        }

        Ok((query.count_raw().await? > 0).then(|| UNIQUE_MESSAGE.to_string()))
    }

    /// Re-resolve the update's subjects under the original filter, then look
    /// for collisions outside the single subject.
    async fn unique_on_update(
        &self,
        field: &CompiledField,
        value: &Value,
        subject: &QueryBuilder,
    ) -> Result<Option<String>, QueryError> {
        let scoped = self.is_language_scoped(field);

        let mut columns = vec![ID_COLUMN.to_string()];
        if self.collection.is_translatable() {
            columns.push(LANGUAGE_COLUMN.to_string());
        }
        let subjects = subject.clone().fetch_raw(Some(columns)).await?;
        if subjects.len() > 1 {
            return Ok(Some(AMBIGUOUS_UNIQUE_MESSAGE.to_string()));
        }

        let mut query = QueryBuilder::new(self.state.clone(), Arc::clone(self.collection))
            .where_eq(&field.name, value.clone());
        let mut language = self.language.to_string();

        if let Some(own) = subjects.first() {
            if let Some(id) = own.get(ID_COLUMN) {
                query = query.where_not(ID_COLUMN, id.clone());
            }
            if let Some(own_language) = own.get(LANGUAGE_COLUMN).and_then(Value::as_str) {
                language = own_language.to_string();
            }
        }
        if scoped {
            query = query.language(language);
        }

        Ok((query.count_raw().await? > 0).then(|| UNIQUE_MESSAGE.to_string()))
    }
}
