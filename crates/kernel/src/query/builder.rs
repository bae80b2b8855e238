//! Per-collection query builder and read execution.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::error::QueryError;
use super::filter::Filter;
use crate::collection::CompiledCollection;
use crate::field::PopulateContext;
use crate::hook::{HookAction, HookContext};
use crate::schema::{ID_COLUMN, KEYWORDS_COLUMN, LANGUAGE_COLUMN, TRANSLATIONS_COLUMN};
use crate::state::AppState;
use crate::store::{Condition, Operator, OrderBy, Record, SortDirection, StoreQuery, sql};

/// Which columns a read returns. The last `select`/`deselect` call wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Projection {
    #[default]
    All,
    Select(Vec<String>),
    Deselect(Vec<String>),
}

/// One page of records.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub records: Vec<Record>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub last_page: u64,
}

/// A query against one collection.
///
/// Clauses accumulate until a terminal method (`first`, `all`, `count`,
/// `exists`, `paginate`, `create`, `create_many`, `update`, `delete`)
/// consumes the builder. Clone a builder to run a variation of it; clones
/// share nothing mutable.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    pub(super) state: AppState,
    pub(super) collection: Arc<CompiledCollection>,
    conditions: Vec<Condition>,
    projection: Projection,
    order: Vec<OrderBy>,
    group: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    pub(super) populate: bool,
    pub(super) language: Option<String>,
    translations_of: Option<Value>,
    unknown: Vec<String>,
    invalid: Vec<String>,
}

impl Filter for QueryBuilder {
    fn collection(&self) -> &Arc<CompiledCollection> {
        &self.collection
    }

    fn push(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    fn reject(&mut self, field: &str) {
        self.unknown.push(field.to_string());
    }
}

impl QueryBuilder {
    pub fn new(state: AppState, collection: Arc<CompiledCollection>) -> Self {
        Self {
            state,
            collection,
            conditions: Vec::new(),
            projection: Projection::All,
            order: Vec::new(),
            group: Vec::new(),
            limit: None,
            offset: None,
            populate: false,
            language: None,
            translations_of: None,
            unknown: Vec::new(),
            invalid: Vec::new(),
        }
    }

    pub fn compiled(&self) -> &CompiledCollection {
        &self.collection
    }

    /// Clauses added so far, in order.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Return only these columns.
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = self.checked(fields);
        self.projection = Projection::Select(fields);
        self
    }

    /// Return every column except these.
    pub fn deselect<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = self.checked(fields);
        self.projection = Projection::Deselect(fields);
        self
    }

    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Self {
        if !self.collection.has_column(field) {
            self.reject(field);
        }
        self.order.push(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    /// Return one record per distinct combination of these columns.
    pub fn group_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = self.checked(fields);
        self.group.extend(fields);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Run each field's populator on returned records.
    pub fn populate(mut self) -> Self {
        self.populate = true;
        self
    }

    /// Work in this language: reads of translatable collections are filtered
    /// to it and creates store it.
    pub fn language(mut self, code: impl Into<String>) -> Self {
        self.language = Some(code.into());
        self
    }

    /// Case-insensitive keyword search over the collection's search fields.
    pub fn search(mut self, term: &str) -> Self {
        if !self.collection.is_searchable() {
            self.invalid.push(format!(
                "collection '{}' has no search fields",
                self.collection.name()
            ));
            return self;
        }
        let pattern = format!("%{}%", sql::escape_like_wildcards(term.trim()));
        self.conditions.push(Condition::predicate(
            KEYWORDS_COLUMN,
            Operator::ILike,
            Value::from(pattern),
        ));
        self
    }

    /// Restrict to the translation group of the record with this id.
    pub fn translations_of(mut self, id: impl Into<Value>) -> Self {
        if !self.collection.is_translatable() {
            self.invalid.push(format!(
                "collection '{}' is not translatable",
                self.collection.name()
            ));
        }
        self.translations_of = Some(id.into());
        self
    }

    fn checked<I, S>(&mut self, fields: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        for field in &fields {
            if !self.collection.has_column(field) {
                self.unknown.push(field.clone());
            }
        }
        fields
    }

    /// Language used for hooks, population and creates.
    pub(super) fn effective_language(&self) -> String {
        self.language
            .clone()
            .unwrap_or_else(|| self.state.config().default_language.clone())
    }

    pub(super) fn hook_context(&self, action: HookAction) -> HookContext {
        HookContext::new(
            self.state.clone(),
            self.collection.name(),
            action,
            &self.effective_language(),
        )
    }

    fn projected_columns(&self) -> Option<Vec<String>> {
        match &self.projection {
            Projection::All => None,
            Projection::Select(fields) => Some(fields.clone()),
            Projection::Deselect(excluded) => Some(
                self.collection
                    .table
                    .column_names()
                    .filter(|c| *c != KEYWORDS_COLUMN && !excluded.iter().any(|e| e == c))
                    .map(str::to_string)
                    .collect(),
            ),
        }
    }

    /// Compile the builder into a store query.
    pub(super) async fn store_query(
        &self,
        columns: Option<Vec<String>>,
    ) -> Result<StoreQuery, QueryError> {
        if let Some(field) = self.unknown.first() {
            return Err(QueryError::UnknownField {
                collection: self.collection.name().to_string(),
                field: field.clone(),
            });
        }
        if let Some(message) = self.invalid.first() {
            return Err(QueryError::InvalidArgument(message.clone()));
        }

        let mut condition = Condition::All(self.conditions.clone());
        if self.collection.is_translatable()
            && let Some(language) = &self.language
        {
            condition = condition.and(Condition::eq(LANGUAGE_COLUMN, language.as_str()));
        }
        if let Some(id) = &self.translations_of {
            condition = condition.and(self.translation_group(id).await?);
        }

        Ok(StoreQuery {
            table: self.collection.name().to_string(),
            condition,
            columns: columns.or_else(|| self.projected_columns()),
            group: self.group.clone(),
            order: self.order.clone(),
            limit: self.limit,
            offset: self.offset,
        })
    }

    async fn translation_group(&self, id: &Value) -> Result<Condition, QueryError> {
        let mut lookup = StoreQuery::new(self.collection.name())
            .filter(Condition::eq(ID_COLUMN, id.clone()))
            .limit(1);
        lookup.columns = Some(vec![TRANSLATIONS_COLUMN.to_string()]);

        let rows = self.state.store().select(&lookup).await?;
        Ok(match rows.first().and_then(|row| row.get(TRANSLATIONS_COLUMN)) {
            Some(group) => Condition::eq(TRANSLATIONS_COLUMN, group.clone()),
            None => Condition::Any(Vec::new()),
        })
    }

    /// Fetch rows without hooks or population.
    pub(crate) async fn fetch_raw(
        self,
        columns: Option<Vec<String>>,
    ) -> Result<Vec<Record>, QueryError> {
        let query = self.store_query(columns).await?;
        Ok(self.state.store().select(&query).await?)
    }

    /// Count rows without hooks.
    pub(crate) async fn count_raw(self) -> Result<u64, QueryError> {
        let query = self.store_query(None).await?;
        Ok(self.state.store().count(&query).await?)
    }

    /// Run `beforeRead` hooks, which may rewrite the query.
    async fn before_read(&self, query: StoreQuery) -> Result<StoreQuery, QueryError> {
        let mut ctx = self.hook_context(HookAction::BeforeRead).with_query(query);
        self.state.hooks().apply(&mut ctx).await?;
        ctx.query.ok_or_else(|| {
            QueryError::InvalidArgument("a beforeRead hook removed the query".to_string())
        })
    }

    /// Every matching record.
    pub async fn all(self) -> Result<Vec<Record>, QueryError> {
        let query = self.store_query(None).await?;
        let query = self.before_read(query).await?;
        let records = self.state.store().select(&query).await?;

        debug!(
            collection = %self.collection.name(),
            rows = records.len(),
            "query executed"
        );

        let mut ctx = self
            .hook_context(HookAction::AfterRead)
            .with_records(records);
        self.state.hooks().apply(&mut ctx).await?;
        self.finish(ctx.records).await
    }

    /// The first matching record.
    pub async fn first(self) -> Result<Option<Record>, QueryError> {
        Ok(self.limit(1).all().await?.into_iter().next())
    }

    /// Number of matching records (groups, for grouped queries).
    pub async fn count(self) -> Result<u64, QueryError> {
        let query = self.store_query(None).await?;
        let query = self.before_read(query).await?;
        let total = self.state.store().count(&query).await?;

        let mut ctx = self.hook_context(HookAction::AfterRead);
        self.state.hooks().apply(&mut ctx).await?;
        Ok(total)
    }

    pub async fn exists(self) -> Result<bool, QueryError> {
        Ok(self.count().await? > 0)
    }

    /// Records of page `page` (1-based) with `per_page` records per page.
    pub async fn paginate(self, page: u64, per_page: u64) -> Result<Page, QueryError> {
        if page == 0 || per_page == 0 {
            return Err(QueryError::InvalidArgument(
                "page and per_page start at 1".to_string(),
            ));
        }

        let total = self.clone().count().await?;
        let records = self
            .offset((page - 1) * per_page)
            .limit(per_page)
            .all()
            .await?;

        Ok(Page {
            records,
            total,
            page,
            per_page,
            last_page: total.div_ceil(per_page).max(1),
        })
    }

    /// Shared tail of every operation returning records: drop internal
    /// columns, populate, then `beforeReturnRecord`.
    pub(super) async fn finish(&self, mut records: Vec<Record>) -> Result<Vec<Record>, QueryError> {
        for record in &mut records {
            record.remove(KEYWORDS_COLUMN);
        }
        if self.populate {
            self.populate_records(&mut records).await?;
        }

        let mut ctx = self
            .hook_context(HookAction::BeforeReturnRecord)
            .with_records(records);
        self.state.hooks().apply(&mut ctx).await?;
        Ok(ctx.records)
    }

    async fn populate_records(&self, records: &mut [Record]) -> Result<(), QueryError> {
        let language = self.effective_language();

        for field in &self.collection.fields {
            let Some(populator) = &field.definition.population else {
                continue;
            };
            let ctx = PopulateContext {
                state: &self.state,
                collection: self.collection.name(),
                field: &field.name,
                options: &field.options,
                language: &language,
            };

            for record in records.iter_mut() {
                let Some(raw) = record.remove(&field.name) else {
                    continue;
                };
                let value = populator
                    .populate(raw, &ctx)
                    .await
                    .map_err(|source| QueryError::Populate {
                        field: field.name.clone(),
                        source,
                    })?;
                record.insert(field.name.clone(), value);
            }
        }
        Ok(())
    }
}
