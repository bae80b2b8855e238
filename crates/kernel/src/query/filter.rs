//! Fluent filter clauses shared by queries and condition groups.

use std::sync::Arc;

use serde_json::Value;

use crate::collection::CompiledCollection;
use crate::store::{Condition, Operator};

/// Predicate builders.
///
/// Every clause is ANDed onto the receiver. Use [`Filter::where_any`] and
/// [`Filter::where_all`] to build OR trees. Fields are checked against the
/// collection's columns; unknown names are reported when the query runs.
pub trait Filter: Sized {
    fn collection(&self) -> &Arc<CompiledCollection>;

    /// Append a condition.
    fn push(&mut self, condition: Condition);

    /// Remember a field name that is not a column of the collection.
    fn reject(&mut self, field: &str);

    fn predicate(mut self, field: &str, operator: Operator, value: Value) -> Self {
        if !self.collection().has_column(field) {
            self.reject(field);
        }
        self.push(Condition::predicate(field, operator, value));
        self
    }

    /// `field = value`. A null value matches missing values.
    fn where_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.predicate(field, Operator::Eq, value.into())
    }

    /// `field <> value`. Rows where the field is NULL do not match.
    fn where_not(self, field: &str, value: impl Into<Value>) -> Self {
        self.predicate(field, Operator::Ne, value.into())
    }

    fn where_gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.predicate(field, Operator::Gt, value.into())
    }

    fn where_gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.predicate(field, Operator::Gte, value.into())
    }

    fn where_lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.predicate(field, Operator::Lt, value.into())
    }

    fn where_lte(self, field: &str, value: impl Into<Value>) -> Self {
        self.predicate(field, Operator::Lte, value.into())
    }

    /// Inclusive range.
    fn where_between(self, field: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        let bounds = Value::Array(vec![low.into(), high.into()]);
        self.predicate(field, Operator::Between, bounds)
    }

    fn where_not_between(
        self,
        field: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        let bounds = Value::Array(vec![low.into(), high.into()]);
        self.predicate(field, Operator::NotBetween, bounds)
    }

    /// Membership. An empty list matches nothing.
    fn where_in<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = Value::Array(values.into_iter().map(Into::into).collect());
        self.predicate(field, Operator::In, values)
    }

    /// Non-membership. An empty list matches everything.
    fn where_not_in<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = Value::Array(values.into_iter().map(Into::into).collect());
        self.predicate(field, Operator::NotIn, values)
    }

    /// SQL LIKE pattern (`%`, `_`, `\` escapes), case-sensitive.
    fn where_like(self, field: &str, pattern: &str) -> Self {
        self.predicate(field, Operator::Like, Value::from(pattern))
    }

    fn where_not_like(self, field: &str, pattern: &str) -> Self {
        self.predicate(field, Operator::NotLike, Value::from(pattern))
    }

    /// SQL LIKE pattern, case-insensitive.
    fn where_ilike(self, field: &str, pattern: &str) -> Self {
        self.predicate(field, Operator::ILike, Value::from(pattern))
    }

    fn where_not_ilike(self, field: &str, pattern: &str) -> Self {
        self.predicate(field, Operator::NotILike, Value::from(pattern))
    }

    fn where_null(self, field: &str) -> Self {
        self.predicate(field, Operator::IsNull, Value::Null)
    }

    fn where_not_null(self, field: &str) -> Self {
        self.predicate(field, Operator::IsNotNull, Value::Null)
    }

    /// At least one clause of the group must hold.
    fn where_any(self, build: impl FnOnce(ConditionGroup) -> ConditionGroup) -> Self {
        self.group(build, Condition::Any)
    }

    /// Every clause of the group must hold.
    fn where_all(self, build: impl FnOnce(ConditionGroup) -> ConditionGroup) -> Self {
        self.group(build, Condition::All)
    }

    /// No clause of the group may hold.
    fn where_none(self, build: impl FnOnce(ConditionGroup) -> ConditionGroup) -> Self {
        self.group(build, |children| {
            Condition::Not(Box::new(Condition::Any(children)))
        })
    }

    #[doc(hidden)]
    fn group(
        mut self,
        build: impl FnOnce(ConditionGroup) -> ConditionGroup,
        wrap: impl FnOnce(Vec<Condition>) -> Condition,
    ) -> Self {
        let group = build(ConditionGroup::new(Arc::clone(self.collection())));
        for field in &group.unknown {
            self.reject(field);
        }
        self.push(wrap(group.conditions));
        self
    }
}

/// A nested list of clauses, combined by the `where_*` group method that
/// created it.
#[derive(Debug, Clone)]
pub struct ConditionGroup {
    collection: Arc<CompiledCollection>,
    conditions: Vec<Condition>,
    unknown: Vec<String>,
}

impl ConditionGroup {
    fn new(collection: Arc<CompiledCollection>) -> Self {
        Self {
            collection,
            conditions: Vec::new(),
            unknown: Vec::new(),
        }
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

impl Filter for ConditionGroup {
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
