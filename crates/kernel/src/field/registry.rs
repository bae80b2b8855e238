//! Field type registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::FieldDefinition;
use crate::plugin::RegistrationError;

/// Registered field types, keyed by name.
///
/// Built once at boot from plugin registrations and read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct FieldRegistry {
    fields: HashMap<String, Arc<FieldDefinition>>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field type. A second registration under the same name is
    /// an error.
    pub fn register(&mut self, field: FieldDefinition) -> Result<(), RegistrationError> {
        if self.fields.contains_key(&field.name) {
            return Err(RegistrationError::DuplicateField(field.name));
        }
        debug!(field = %field.name, "field type registered");
        self.fields.insert(field.name.clone(), Arc::new(field));
        Ok(())
    }

    /// Register a field type, replacing any earlier one with the same name.
    pub fn register_override(&mut self, field: FieldDefinition) {
        debug!(field = %field.name, "field type overridden");
        self.fields.insert(field.name.clone(), Arc::new(field));
    }

    pub fn get(&self, name: &str) -> Option<Arc<FieldDefinition>> {
        self.fields.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.fields.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
