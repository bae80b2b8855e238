//! Hook registry: ordered callbacks per `(collection, action)`.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Hook, HookAction};
use crate::plugin::RegistrationError;

/// A hook as contributed by a plugin.
#[derive(Clone)]
pub struct HookRegistration {
    pub collection: String,
    pub action: HookAction,
    pub hook: Arc<dyn Hook>,
}

impl std::fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistration")
            .field("collection", &self.collection)
            .field("action", &self.action)
            .finish()
    }
}

/// Registry mapping `(collection, action)` to hooks in registration order.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<(String, HookAction), Vec<Arc<dyn Hook>>>,
}

impl HookRegistry {
    /// Build the registry. Hooks for collections that `is_known` rejects are
    /// dropped and reported.
    pub fn build(
        registrations: Vec<HookRegistration>,
        is_known: impl Fn(&str) -> bool,
    ) -> (Self, Vec<RegistrationError>) {
        let mut registry = Self::default();
        let mut errors = Vec::new();

        for registration in registrations {
            if !is_known(&registration.collection) {
                errors.push(RegistrationError::UnknownHookCollection {
                    collection: registration.collection,
                    action: registration.action.to_string(),
                });
                continue;
            }
            registry
                .hooks
                .entry((registration.collection, registration.action))
                .or_default()
                .push(registration.hook);
        }

        (registry, errors)
    }

    /// Hooks for a stage, in registration order.
    pub fn get(&self, collection: &str, action: HookAction) -> &[Arc<dyn Hook>] {
        self.hooks
            .get(&(collection.to_string(), action))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_hooks(&self, collection: &str, action: HookAction) -> bool {
        !self.get(collection, action).is_empty()
    }

    /// Total number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.len())
            .finish()
    }
}
