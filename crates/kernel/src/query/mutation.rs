//! Create, update and delete execution.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::builder::QueryBuilder;
use super::error::MutationError;
use super::filter::Filter;
use crate::collection::{CollectionMode, CompiledCollection};
use crate::field::Operation;
use crate::hook::HookAction;
use crate::input::{InputPipeline, UNIQUE_MESSAGE, ValidationError};
use crate::schema::{
    CREATED_AT_COLUMN, ID_COLUMN, KEYWORDS_COLUMN, LANGUAGE_COLUMN, TRANSLATIONS_COLUMN,
    UPDATED_AT_COLUMN,
};
use crate::store::{Condition, Operator, Record, StoreError};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Search keywords of a record, from each search field's extractor.
pub(crate) fn keywords(collection: &CompiledCollection, record: &Record) -> String {
    collection
        .search_fields()
        .filter_map(|field| {
            let value = record.get(&field.name)?;
            let words = (field.definition.extract_keywords)(value);
            (!words.trim().is_empty()).then(|| words.trim().to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A validated create input waiting to be inserted.
struct Pending {
    record: Record,
    language: String,
    group: Option<Value>,
}

impl QueryBuilder {
    /// Create one record.
    pub async fn create(self, input: Record) -> Result<Record, MutationError> {
        let mut created = self
            .create_inputs(vec![input])
            .await
            .map_err(|err| match err {
                MutationError::Batch(errors) => match errors.into_iter().flatten().next() {
                    Some(errors) => MutationError::Validation(errors),
                    None => MutationError::Rejected("input failed validation".to_string()),
                },
                other => other,
            })?;
        created
            .pop()
            .ok_or_else(|| MutationError::Rejected("no record was created".to_string()))
    }

    /// Create several records. Every input is validated, against the store
    /// and against the inputs before it, before anything is inserted.
    pub async fn create_many(self, inputs: Vec<Record>) -> Result<Vec<Record>, MutationError> {
        self.create_inputs(inputs).await
    }

    async fn create_inputs(self, inputs: Vec<Record>) -> Result<Vec<Record>, MutationError> {
        let collection = &self.collection;
        let default_language = self.effective_language();

        let mut pending: Vec<Pending> = Vec::with_capacity(inputs.len());
        let mut batch: Vec<Record> = Vec::with_capacity(inputs.len());
        let mut errors: Vec<Option<ValidationError>> = Vec::with_capacity(inputs.len());

        for mut input in inputs {
            let mut group = None;
            let mut language = default_language.clone();
            if collection.is_translatable() {
                group = input.remove(TRANSLATIONS_COLUMN).filter(|g| !g.is_null());
                if let Some(code) = input.remove(LANGUAGE_COLUMN) {
                    match code.as_str() {
                        Some(code) => language = code.to_string(),
                        None => {
                            errors.push(Some(ValidationError::single(
                                LANGUAGE_COLUMN,
                                "Language must be a string",
                            )));
                            continue;
                        }
                    }
                }
            }

            let pipeline =
                InputPipeline::new(&self.state, collection, Operation::Create, &language);
            match pipeline.process(&input, &batch, None).await {
                Ok(mut record) => {
                    if collection.is_translatable() {
                        record.insert(LANGUAGE_COLUMN.to_string(), Value::from(language.as_str()));
                    }
                    batch.push(record.clone());
                    pending.push(Pending {
                        record,
                        language,
                        group,
                    });
                    errors.push(None);
                }
                Err(MutationError::Validation(field_errors)) => errors.push(Some(field_errors)),
                Err(other) => return Err(other),
            }
        }

        if errors.iter().any(Option::is_some) {
            return Err(MutationError::Batch(errors));
        }

        self.check_single(&pending).await?;
        self.check_translations(&pending).await?;

        let mut created = Vec::with_capacity(pending.len());
        for item in pending {
            created.push(self.insert_one(item).await?);
        }

        info!(
            collection = %self.collection.name(),
            count = created.len(),
            "records created"
        );

        let created = self.finish(created).await?;
        self.flush_pages().await;
        Ok(created)
    }

    /// Single collections hold at most one record per language.
    async fn check_single(&self, pending: &[Pending]) -> Result<(), MutationError> {
        if self.collection.mode() != CollectionMode::Single {
            return Ok(());
        }

        for (position, item) in pending.iter().enumerate() {
            let mut existing = QueryBuilder::new(self.state.clone(), self.collection.clone());
            if self.collection.is_translatable() {
                existing = existing.language(item.language.as_str());
            }
            let in_batch = pending[..position].iter().any(|earlier| {
                !self.collection.is_translatable() || earlier.language == item.language
            });

            if in_batch || existing.count_raw().await? > 0 {
                return Err(MutationError::Rejected(format!(
                    "collection '{}' holds a single record",
                    self.collection.name()
                )));
            }
        }
        Ok(())
    }

    /// Languages must be configured, and a translation group takes each
    /// language at most once.
    async fn check_translations(&self, pending: &[Pending]) -> Result<(), MutationError> {
        if !self.collection.is_translatable() {
            return Ok(());
        }

        for (position, item) in pending.iter().enumerate() {
            if !self.state.config().languages.contains(&item.language) {
                return Err(MutationError::Validation(ValidationError::single(
                    LANGUAGE_COLUMN,
                    format!("Language '{}' is not enabled", item.language),
                )));
            }

            let Some(group) = &item.group else {
                continue;
            };

            let members = QueryBuilder::new(self.state.clone(), self.collection.clone())
                .where_eq(TRANSLATIONS_COLUMN, group.clone());
            if members.clone().count_raw().await? == 0 {
                return Err(MutationError::Validation(ValidationError::single(
                    TRANSLATIONS_COLUMN,
                    "Translation group does not exist",
                )));
            }

            let taken_in_batch = pending[..position].iter().any(|earlier| {
                earlier.group.as_ref() == Some(group) && earlier.language == item.language
            });
            let taken = taken_in_batch
                || members
                    .where_eq(LANGUAGE_COLUMN, item.language.as_str())
                    .count_raw()
                    .await?
                    > 0;
            if taken {
                return Err(MutationError::Validation(ValidationError::single(
                    LANGUAGE_COLUMN,
                    format!("A '{}' translation already exists", item.language),
                )));
            }
        }
        Ok(())
    }

    async fn insert_one(&self, item: Pending) -> Result<Record, MutationError> {
        let mut ctx = self
            .hook_context(HookAction::BeforeCreate)
            .with_input(item.record);
        ctx.language = item.language.clone();
        self.state.hooks().apply(&mut ctx).await?;
        let mut record = ctx.input.take().unwrap_or_default();

        let id = Uuid::now_v7().to_string();
        if self.collection.is_translatable() {
            let group = item.group.unwrap_or_else(|| Value::from(id.as_str()));
            record.insert(LANGUAGE_COLUMN.to_string(), Value::from(item.language.as_str()));
            record.insert(TRANSLATIONS_COLUMN.to_string(), group);
        }
        record.insert(ID_COLUMN.to_string(), Value::from(id));
        if self.collection.has_timestamps() {
            let now = now_millis();
            record.insert(CREATED_AT_COLUMN.to_string(), Value::from(now));
            record.insert(UPDATED_AT_COLUMN.to_string(), Value::from(now));
        }
        if self.collection.is_searchable() {
            let words = keywords(&self.collection, &record);
            record.insert(KEYWORDS_COLUMN.to_string(), Value::from(words));
        }

        let stored = self
            .state
            .store()
            .insert(self.collection.name(), &record)
            .await
            .map_err(|err| self.store_error(err))?;

        let mut ctx = self
            .hook_context(HookAction::AfterCreate)
            .with_records(vec![stored]);
        ctx.language = item.language;
        self.state.hooks().apply(&mut ctx).await?;
        ctx.records.pop().ok_or_else(|| {
            MutationError::Rejected("an afterCreate hook dropped the record".to_string())
        })
    }

    /// Apply `changes` to every matching record and return them as updated.
    pub async fn update(self, changes: Record) -> Result<Vec<Record>, MutationError> {
        let subjects = self.clone().fetch_raw(None).await?;
        let language = self.effective_language();

        let pipeline = InputPipeline::new(
            &self.state,
            &self.collection,
            Operation::Update,
            &language,
        );
        let changes = pipeline.process(&changes, &[], Some(&self)).await?;

        if subjects.is_empty() {
            return Ok(Vec::new());
        }
        let ids = subject_ids(&subjects);

        let mut ctx = self
            .hook_context(HookAction::BeforeUpdate)
            .with_input(changes)
            .with_query(self.store_query(None).await?)
            .with_records(subjects);
        self.state.hooks().apply(&mut ctx).await?;
        let mut changes = ctx.input.take().unwrap_or_default();

        if self.collection.has_timestamps() {
            changes.insert(UPDATED_AT_COLUMN.to_string(), Value::from(now_millis()));
        }

        let store = self.state.store();
        let by_id = Condition::predicate(ID_COLUMN, Operator::In, Value::Array(ids.clone()));
        let affected = store
            .update(self.collection.name(), &by_id, &changes)
            .await
            .map_err(|err| self.store_error(err))?;

        let updated = QueryBuilder::new(self.state.clone(), self.collection.clone())
            .where_in(ID_COLUMN, ids)
            .fetch_raw(None)
            .await?;

        let search_changed = self
            .collection
            .search_fields()
            .any(|field| changes.contains_key(&field.name));
        if search_changed {
            for record in &updated {
                let Some(id) = record.get(ID_COLUMN) else {
                    continue;
                };
                let mut refresh = Record::new();
                refresh.insert(
                    KEYWORDS_COLUMN.to_string(),
                    Value::from(keywords(&self.collection, record)),
                );
                store
                    .update(
                        self.collection.name(),
                        &Condition::eq(ID_COLUMN, id.clone()),
                        &refresh,
                    )
                    .await?;
            }
        }

        debug!(collection = %self.collection.name(), affected, "records updated");

        let mut ctx = self
            .hook_context(HookAction::AfterUpdate)
            .with_records(updated);
        self.state.hooks().apply(&mut ctx).await?;
        let updated = self.finish(ctx.records).await?;
        self.flush_pages().await;
        Ok(updated)
    }

    /// Delete every matching record. Returns how many were deleted.
    pub async fn delete(self) -> Result<u64, MutationError> {
        let subjects = self.clone().fetch_raw(None).await?;
        if subjects.is_empty() {
            return Ok(0);
        }
        let ids = subject_ids(&subjects);

        let mut ctx = self
            .hook_context(HookAction::BeforeDelete)
            .with_query(self.store_query(None).await?)
            .with_records(subjects);
        self.state.hooks().apply(&mut ctx).await?;

        let by_id = Condition::predicate(ID_COLUMN, Operator::In, Value::Array(ids));
        let deleted = self
            .state
            .store()
            .delete(self.collection.name(), &by_id)
            .await?;

        debug!(collection = %self.collection.name(), deleted, "records deleted");

        let mut ctx = self
            .hook_context(HookAction::AfterDelete)
            .with_records(ctx.records);
        self.state.hooks().apply(&mut ctx).await?;
        self.flush_pages().await;
        Ok(deleted)
    }

    /// Map a unique index violation back to the field owning the index.
    fn store_error(&self, err: StoreError) -> MutationError {
        match err {
            StoreError::UniqueViolation { index } => {
                match index
                    .as_deref()
                    .and_then(|index| self.collection.field_for_index(index))
                {
                    Some(field) => MutationError::Validation(ValidationError::single(
                        field.name.as_str(),
                        UNIQUE_MESSAGE,
                    )),
                    None => MutationError::Rejected("a unique constraint was violated".to_string()),
                }
            }
            other => other.into(),
        }
    }

    async fn flush_pages(&self) {
        if self.collection.has_public_pages() {
            self.state.cache().flush_pages(self.collection.name()).await;
        }
    }
}

fn subject_ids(subjects: &[Record]) -> Vec<Value> {
    subjects
        .iter()
        .filter_map(|record| record.get(ID_COLUMN).cloned())
        .collect()
}
