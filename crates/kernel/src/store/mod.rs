//! Durable store abstraction.
//!
//! Every backend implements [`Store`]. Queries are handed to the backend as a
//! [`StoreQuery`] (table, condition tree, projection, grouping, ordering and
//! paging); the backend decides how to evaluate them. Two backends ship with
//! the kernel:
//!
//! - [`PgStore`]: PostgreSQL through sqlx, SQL generated with SeaQuery
//! - [`MemoryStore`]: process-local tables for development and tests

mod memory;
mod postgres;
pub mod sql;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::schema::{LiveTable, SchemaChange};

/// A single row: column name to JSON value.
pub type Record = serde_json::Map<String, Value>;

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table '{0}' does not exist")]
    TableNotFound(String),

    #[error("column '{column}' does not exist on table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("unique constraint violated")]
    UniqueViolation {
        /// Name of the violated index, when the backend reports it.
        index: Option<String>,
    },

    #[error("invalid schema change: {0}")]
    InvalidChange(String),

    #[error("could not build statement: {0}")]
    Statement(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("unexpected row shape: {0}")]
    Decode(String),
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Value is a two-element array `[low, high]`, inclusive.
    Between,
    NotBetween,
    /// Value is an array.
    In,
    NotIn,
    /// Case-sensitive SQL LIKE pattern.
    Like,
    NotLike,
    /// Case-insensitive SQL LIKE pattern.
    ILike,
    NotILike,
    IsNull,
    IsNotNull,
}

/// One `field operator value` comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

/// Boolean condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Every child must hold. Empty means "always".
    All(Vec<Condition>),
    /// At least one child must hold. Empty means "never".
    Any(Vec<Condition>),
    Not(Box<Condition>),
    Predicate(Predicate),
}

impl Default for Condition {
    fn default() -> Self {
        Condition::All(Vec::new())
    }
}

impl Condition {
    pub fn predicate(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Condition::Predicate(Predicate {
            field: field.into(),
            operator,
            value,
        })
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::predicate(field, Operator::Eq, value.into())
    }

    /// `true` for a condition that places no restriction.
    pub fn is_empty(&self) -> bool {
        matches!(self, Condition::All(children) if children.iter().all(Condition::is_empty))
    }

    /// AND another condition onto this one.
    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::All(mut children) => {
                children.push(other);
                Condition::All(children)
            }
            this => Condition::All(vec![this, other]),
        }
    }

    /// Every field referenced anywhere in the tree.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::All(children) | Condition::Any(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            Condition::Not(inner) => inner.collect_fields(out),
            Condition::Predicate(p) => out.push(p.field.as_str()),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// A backend-independent read query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreQuery {
    pub table: String,
    #[serde(default)]
    pub condition: Condition,
    /// `None` selects every column.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub group: Vec<String>,
    #[serde(default)]
    pub order: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl StoreQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.condition = std::mem::take(&mut self.condition).and(condition);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Columns actually returned. Grouped queries return only the group columns
    /// unless an explicit projection is set.
    pub fn effective_columns(&self) -> Option<Vec<String>> {
        match (&self.columns, self.group.is_empty()) {
            (Some(cols), _) => Some(cols.clone()),
            (None, false) => Some(self.group.clone()),
            (None, true) => None,
        }
    }
}

/// A durable store backend.
#[async_trait]
pub trait Store: Debug + Send + Sync + 'static {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    /// Fetch rows.
    async fn select(&self, query: &StoreQuery) -> Result<Vec<Record>, StoreError>;

    /// Count rows (groups, for grouped queries). Ignores limit/offset.
    async fn count(&self, query: &StoreQuery) -> Result<u64, StoreError>;

    /// Insert one row and return it as stored.
    async fn insert(&self, table: &str, row: &Record) -> Result<Record, StoreError>;

    /// Apply `changes` to every row matching `condition`. Returns rows affected.
    async fn update(
        &self,
        table: &str,
        condition: &Condition,
        changes: &Record,
    ) -> Result<u64, StoreError>;

    /// Delete every row matching `condition`. Returns rows affected.
    async fn delete(&self, table: &str, condition: &Condition) -> Result<u64, StoreError>;

    /// Describe a live table, or `None` when it does not exist.
    async fn describe(&self, table: &str) -> Result<Option<LiveTable>, StoreError>;

    /// Apply schema changes atomically where the backend allows it.
    async fn apply(&self, changes: &[SchemaChange]) -> Result<(), StoreError>;

    /// Whether the backend is reachable.
    async fn healthy(&self) -> bool {
        true
    }
}
