//! Lifecycle hooks.
//!
//! Hooks are callbacks keyed by `(collection, HookAction)` that run around
//! every CRUD stage of a query. Within one dispatch they run sequentially in
//! registration order; the first failure aborts the chain and fails the
//! query operation.

mod dispatcher;
mod registry;

pub use dispatcher::{HookDispatcher, HookError};
pub use registry::{HookRegistration, HookRegistry};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::store::{Record, StoreQuery};

/// Lifecycle stage a hook runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookAction {
    BeforeCreate,
    AfterCreate,
    BeforeRead,
    AfterRead,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    BeforeReturnRecord,
}

impl HookAction {
    pub const ALL: [HookAction; 9] = [
        HookAction::BeforeCreate,
        HookAction::AfterCreate,
        HookAction::BeforeRead,
        HookAction::AfterRead,
        HookAction::BeforeUpdate,
        HookAction::AfterUpdate,
        HookAction::BeforeDelete,
        HookAction::AfterDelete,
        HookAction::BeforeReturnRecord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookAction::BeforeCreate => "beforeCreate",
            HookAction::AfterCreate => "afterCreate",
            HookAction::BeforeRead => "beforeRead",
            HookAction::AfterRead => "afterRead",
            HookAction::BeforeUpdate => "beforeUpdate",
            HookAction::AfterUpdate => "afterUpdate",
            HookAction::BeforeDelete => "beforeDelete",
            HookAction::AfterDelete => "afterDelete",
            HookAction::BeforeReturnRecord => "beforeReturnRecord",
        }
    }
}

impl fmt::Display for HookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable context passed through a hook chain.
///
/// Which parts are set depends on the action: `input` for create/update,
/// `query` for reads/updates/deletes, `records` for after-hooks and
/// `beforeReturnRecord`.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub state: AppState,
    pub collection: String,
    pub action: HookAction,
    pub language: String,
    pub input: Option<Record>,
    pub query: Option<StoreQuery>,
    pub records: Vec<Record>,
}

impl HookContext {
    pub fn new(state: AppState, collection: &str, action: HookAction, language: &str) -> Self {
        Self {
            state,
            collection: collection.to_string(),
            action,
            language: language.to_string(),
            input: None,
            query: None,
            records: Vec::new(),
        }
    }

    pub fn with_input(mut self, input: Record) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_query(mut self, query: StoreQuery) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_records(mut self, records: Vec<Record>) -> Self {
        self.records = records;
        self
    }
}

/// A lifecycle callback.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn call(&self, ctx: &mut HookContext) -> anyhow::Result<()>;
}

struct FnHook<F>(F);

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&mut HookContext) -> anyhow::Result<()> + Send + Sync,
{
    async fn call(&self, ctx: &mut HookContext) -> anyhow::Result<()> {
        (self.0)(ctx)
    }
}

/// Wrap a synchronous function as a [`Hook`].
pub fn hook<F>(f: F) -> Arc<dyn Hook>
where
    F: Fn(&mut HookContext) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHook(f))
}
