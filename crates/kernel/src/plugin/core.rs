//! Built-in registrations every kernel carries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Plugin, Registrar};
use crate::auth::{PasswordHook, USERS_COLLECTION, strip_passwords, users_collection};
use crate::field::builtin_fields;
use crate::hook::{HookAction, hook};
use crate::jobs::{JobDefinition, JobHandler};
use crate::state::AppState;

/// Name of the interval job removing expired session tokens.
pub const CLEAN_EXPIRED_TOKENS: &str = "clean-expired-tokens";

/// Field types, the users collection and token cleanup.
#[derive(Debug, Clone)]
pub struct CorePlugin {
    sweep_interval: Duration,
}

impl CorePlugin {
    pub fn new(sweep_interval: Duration) -> Self {
        Self { sweep_interval }
    }
}

struct SweepTokens;

#[async_trait]
impl JobHandler for SweepTokens {
    async fn run(&self, state: &AppState, _args: Vec<Value>) -> anyhow::Result<Value> {
        let removed = state.tokens().sweep_expired().await?;
        Ok(json!({ "removed": removed }))
    }
}

impl Plugin for CorePlugin {
    fn name(&self) -> &str {
        "core"
    }

    fn register(&self, registrar: &mut Registrar) {
        match builtin_fields() {
            Ok(fields) => fields.into_iter().for_each(|f| registrar.field(f)),
            Err(error) => registrar.error(error),
        }

        registrar.collection(users_collection());
        let password = Arc::new(PasswordHook);
        registrar.hook(USERS_COLLECTION, HookAction::BeforeCreate, password.clone());
        registrar.hook(USERS_COLLECTION, HookAction::BeforeUpdate, password);
        registrar.hook(
            USERS_COLLECTION,
            HookAction::BeforeReturnRecord,
            hook(strip_passwords),
        );

        let mut sweep = JobDefinition::new(CLEAN_EXPIRED_TOKENS, Arc::new(SweepTokens));
        if !self.sweep_interval.is_zero() {
            sweep = sweep.every(self.sweep_interval);
        }
        registrar.job(sweep);
    }
}
