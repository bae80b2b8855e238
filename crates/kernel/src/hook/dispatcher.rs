//! Hook dispatcher: runs hook chains sequentially, aborting on failure.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use super::{HookAction, HookContext, HookRegistry};

/// A hook in a chain failed; the remaining hooks did not run.
#[derive(Debug, Error)]
#[error("{action} hook for '{collection}' failed: {source}")]
pub struct HookError {
    pub collection: String,
    pub action: HookAction,
    #[source]
    pub source: anyhow::Error,
}

/// Invokes registered hooks.
#[derive(Clone, Default)]
pub struct HookDispatcher {
    registry: Arc<HookRegistry>,
}

impl HookDispatcher {
    pub fn new(registry: Arc<HookRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    /// Run every hook for `(ctx.collection, ctx.action)` in order.
    ///
    /// Each hook sees the context as left by the previous one. The first
    /// error stops the chain.
    pub async fn apply(&self, ctx: &mut HookContext) -> Result<(), HookError> {
        let hooks = self.registry.get(&ctx.collection, ctx.action);
        if hooks.is_empty() {
            return Ok(());
        }

        for (position, hook) in hooks.iter().enumerate() {
            if let Err(source) = hook.call(ctx).await {
                warn!(
                    collection = %ctx.collection,
                    action = %ctx.action,
                    position,
                    error = %source,
                    "hook failed, aborting chain"
                );
                return Err(HookError {
                    collection: ctx.collection.clone(),
                    action: ctx.action,
                    source,
                });
            }
        }

        debug!(
            collection = %ctx.collection,
            action = %ctx.action,
            hooks = hooks.len(),
            "hooks applied"
        );
        Ok(())
    }
}

impl std::fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDispatcher")
            .field("registry", &self.registry)
            .finish()
    }
}
