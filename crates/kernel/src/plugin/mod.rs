//! Plugin registration.
//!
//! Plugins are linked statically and contribute field types, collections,
//! hooks and jobs through a [`Registrar`] at startup. Registration problems
//! are collected into a [`BootReport`]; they never stop the kernel from
//! booting with whatever registered cleanly.

mod core;
mod error;

pub use core::{CLEAN_EXPIRED_TOKENS, CorePlugin};
pub use error::RegistrationError;

use std::sync::Arc;

use tracing::warn;

use crate::collection::{CollectionDefinition, CompileDiagnostic};
use crate::field::{FieldDefinition, FieldRegistry, FieldSpec, define_field};
use crate::hook::{Hook, HookAction, HookRegistration};
use crate::jobs::{JobDefinition, JobRegistry};

/// A statically linked extension.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn register(&self, registrar: &mut Registrar);
}

/// A registration error and the plugin that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDiagnostic {
    pub plugin: String,
    pub error: RegistrationError,
}

/// Collects contributions from every plugin.
#[derive(Default)]
pub struct Registrar {
    current: String,
    fields: Vec<(String, FieldDefinition, bool)>,
    collections: Vec<(String, CollectionDefinition)>,
    hooks: Vec<(String, HookRegistration)>,
    jobs: Vec<(String, JobDefinition)>,
    diagnostics: Vec<PluginDiagnostic>,
}

impl Registrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one plugin's registration.
    pub fn register(&mut self, plugin: &dyn Plugin) {
        self.current = plugin.name().to_string();
        plugin.register(self);
    }

    /// Record a problem found by the plugin itself.
    pub fn error(&mut self, error: RegistrationError) {
        self.diagnostics.push(PluginDiagnostic {
            plugin: self.current.clone(),
            error,
        });
    }

    pub fn field(&mut self, definition: FieldDefinition) {
        self.fields
            .push((self.current.clone(), definition, false));
    }

    /// Replace an already registered field type.
    pub fn field_override(&mut self, definition: FieldDefinition) {
        self.fields.push((self.current.clone(), definition, true));
    }

    /// Define and register a field type in one step.
    pub fn define_field(&mut self, spec: FieldSpec) {
        match define_field(spec) {
            Ok(definition) => self.field(definition),
            Err(error) => self.error(error),
        }
    }

    pub fn collection(&mut self, definition: CollectionDefinition) {
        self.collections.push((self.current.clone(), definition));
    }

    pub fn hook(&mut self, collection: &str, action: HookAction, hook: Arc<dyn Hook>) {
        self.hooks.push((
            self.current.clone(),
            HookRegistration {
                collection: collection.to_string(),
                action,
                hook,
            },
        ));
    }

    pub fn job(&mut self, job: JobDefinition) {
        self.jobs.push((self.current.clone(), job));
    }

    /// Resolve every contribution into registries.
    pub fn finish(self) -> Registrations {
        let mut diagnostics = self.diagnostics;
        let mut report = |plugin: String, error: RegistrationError| {
            warn!(plugin = %plugin, error = %error, "registration error");
            diagnostics.push(PluginDiagnostic { plugin, error });
        };

        let mut fields = FieldRegistry::new();
        for (plugin, definition, is_override) in self.fields {
            if is_override {
                fields.register_override(definition);
            } else if let Err(error) = fields.register(definition) {
                report(plugin, error);
            }
        }

        let mut collections: Vec<CollectionDefinition> = Vec::new();
        for (plugin, definition) in self.collections {
            if collections.iter().any(|c| c.name == definition.name) {
                report(
                    plugin,
                    RegistrationError::DuplicateCollection(definition.name),
                );
            } else {
                collections.push(definition);
            }
        }

        let mut hook_owners = Vec::with_capacity(self.hooks.len());
        let mut hooks = Vec::with_capacity(self.hooks.len());
        for (plugin, registration) in self.hooks {
            hook_owners.push((plugin, registration.collection.clone()));
            hooks.push(registration);
        }

        let mut jobs = JobRegistry::new();
        for (plugin, job) in self.jobs {
            if let Err(error) = jobs.register(job) {
                report(plugin, error);
            }
        }

        Registrations {
            fields,
            collections,
            hooks,
            hook_owners,
            jobs,
            diagnostics,
        }
    }
}

/// Everything plugins registered, before collections are compiled.
pub struct Registrations {
    pub fields: FieldRegistry,
    pub collections: Vec<CollectionDefinition>,
    pub hooks: Vec<HookRegistration>,
    /// `(plugin, collection)` per hook, for diagnostics.
    pub hook_owners: Vec<(String, String)>,
    pub jobs: JobRegistry,
    pub diagnostics: Vec<PluginDiagnostic>,
}

/// What went wrong while booting.
#[derive(Debug, Clone, Default)]
pub struct BootReport {
    pub registration: Vec<PluginDiagnostic>,
    pub compile: Vec<CompileDiagnostic>,
}

impl BootReport {
    pub fn error_count(&self) -> usize {
        self.registration.len() + self.compile.len()
    }

    pub fn is_clean(&self) -> bool {
        self.error_count() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::collection::CollectionField;
    use crate::field::{FieldSpec, JsType};

    struct Blog;

    impl Plugin for Blog {
        fn name(&self) -> &str {
            "blog"
        }

        fn register(&self, registrar: &mut Registrar) {
            registrar.define_field(FieldSpec::new("text", JsType::String));
            registrar.define_field(FieldSpec::new("text", JsType::String));
            registrar.define_field(FieldSpec::new("Bad Name", JsType::String));
            registrar.collection(
                CollectionDefinition::new("posts").field(CollectionField::new("title", "text")),
            );
            registrar.collection(CollectionDefinition::new("posts"));
        }
    }

    #[test]
    fn problems_are_collected_per_plugin() {
        let mut registrar = Registrar::new();
        registrar.register(&Blog);
        let registrations = registrar.finish();

        assert_eq!(registrations.fields.len(), 1);
        assert_eq!(registrations.collections.len(), 1);

        let errors: Vec<&RegistrationError> = registrations
            .diagnostics
            .iter()
            .map(|d| &d.error)
            .collect();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&&RegistrationError::DuplicateField("text".into())));
        assert!(errors.contains(&&RegistrationError::InvalidFieldName("Bad Name".into())));
        assert!(errors.contains(&&RegistrationError::DuplicateCollection("posts".into())));
        assert!(registrations.diagnostics.iter().all(|d| d.plugin == "blog"));
    }

    #[test]
    fn overrides_replace_fields() {
        let mut registrar = Registrar::new();
        registrar.field(define_field(FieldSpec::new("text", JsType::String)).unwrap());
        registrar.field_override(define_field(FieldSpec::new("text", JsType::Number)).unwrap());
        let registrations = registrar.finish();
        assert!(registrations.diagnostics.is_empty());
        assert_eq!(
            registrations.fields.get("text").unwrap().field_type.js,
            JsType::Number
        );
    }
}
