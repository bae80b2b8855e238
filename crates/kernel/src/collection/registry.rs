//! Collection registry.
//!
//! Holds every registered collection definition and its compiled form.
//! Compiled collections are cached; `invalidate` drops one so the next lookup
//! recompiles it and `rebuild` recompiles everything.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::compiler::{CompileDiagnostic, CompiledCollection, compile_collection};
use super::definition::CollectionDefinition;
use crate::field::FieldRegistry;
use crate::schema::TableSchema;

/// Registry of collections.
#[derive(Clone)]
pub struct CollectionRegistry {
    inner: Arc<CollectionRegistryInner>,
}

struct CollectionRegistryInner {
    fields: Arc<FieldRegistry>,
    /// Declaration order, for deterministic rebuilds and migrations.
    order: Vec<String>,
    definitions: DashMap<String, CollectionDefinition>,
    compiled: DashMap<String, Arc<CompiledCollection>>,
    diagnostics: RwLock<Vec<CompileDiagnostic>>,
}

impl CollectionRegistry {
    /// Create a registry and compile every definition.
    ///
    /// Definitions must have unique names; duplicates are filtered out during
    /// plugin registration.
    pub fn new(fields: Arc<FieldRegistry>, definitions: Vec<CollectionDefinition>) -> Self {
        let order = definitions.iter().map(|d| d.name.clone()).collect();
        let registry = Self {
            inner: Arc::new(CollectionRegistryInner {
                fields,
                order,
                definitions: definitions
                    .into_iter()
                    .map(|d| (d.name.clone(), d))
                    .collect(),
                compiled: DashMap::new(),
                diagnostics: RwLock::new(Vec::new()),
            }),
        };
        registry.rebuild();
        registry
    }

    /// The field registry collections are compiled against.
    pub fn fields(&self) -> &FieldRegistry {
        &self.inner.fields
    }

    /// Get a compiled collection, compiling it first if it was invalidated.
    pub fn get(&self, name: &str) -> Option<Arc<CompiledCollection>> {
        if let Some(compiled) = self.inner.compiled.get(name) {
            return Some(Arc::clone(&compiled));
        }

        let definition = self.inner.definitions.get(name)?.clone();
        let (compiled, diagnostics) = compile_collection(&self.inner.fields, &definition);
        self.replace_diagnostics(name, diagnostics);

        let compiled = Arc::new(compiled?);
        self.inner
            .compiled
            .insert(name.to_string(), Arc::clone(&compiled));
        debug!(collection = %name, "collection compiled");
        Some(compiled)
    }

    /// Whether a collection with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.definitions.contains_key(name)
    }

    /// Drop the compiled form of one collection.
    pub fn invalidate(&self, name: &str) {
        self.inner.compiled.remove(name);
    }

    /// Recompile every collection. Returns the number of compile errors.
    pub fn rebuild(&self) -> usize {
        self.inner.compiled.clear();
        self.inner.diagnostics.write().clear();

        for name in &self.inner.order {
            // A definition whose name does not compile is reported by `get`.
            let _ = self.get(name);
        }

        let errors = self.error_count();
        if errors > 0 {
            warn!(
                errors,
                collections = self.inner.compiled.len(),
                "collections compiled with errors"
            );
        } else {
            info!(
                collections = self.inner.compiled.len(),
                "collections compiled"
            );
        }
        errors
    }

    fn replace_diagnostics(&self, name: &str, diagnostics: Vec<CompileDiagnostic>) {
        let mut all = self.inner.diagnostics.write();
        all.retain(|d| d.collection != name);
        for d in &diagnostics {
            warn!(
                collection = %d.collection,
                field = ?d.field,
                error = %d.error,
                "collection compile error"
            );
        }
        all.extend(diagnostics);
    }

    /// Names in declaration order.
    pub fn names(&self) -> Vec<String> {
        self.inner.order.clone()
    }

    /// Compiled collections in declaration order.
    pub fn compiled(&self) -> Vec<Arc<CompiledCollection>> {
        self.inner
            .order
            .iter()
            .filter_map(|name| self.get(name))
            .collect()
    }

    /// Storage tables of every compiled collection.
    pub fn tables(&self) -> Vec<TableSchema> {
        self.compiled().iter().map(|c| c.table.clone()).collect()
    }

    pub fn diagnostics(&self) -> Vec<CompileDiagnostic> {
        self.inner.diagnostics.read().clone()
    }

    pub fn error_count(&self) -> usize {
        self.inner.diagnostics.read().len()
    }
}

impl std::fmt::Debug for CollectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionRegistry")
            .field("collections", &self.inner.order)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::collection::CollectionField;
    use crate::field::builtin_fields;

    fn registry(definitions: Vec<CollectionDefinition>) -> CollectionRegistry {
        let mut fields = FieldRegistry::new();
        for field in builtin_fields().unwrap() {
            fields.register(field).unwrap();
        }
        CollectionRegistry::new(Arc::new(fields), definitions)
    }

    #[test]
    fn partial_availability() {
        let registry = registry(vec![
            CollectionDefinition::new("good").field(CollectionField::new("a", "text")),
            CollectionDefinition::new("half")
                .field(CollectionField::new("a", "text"))
                .field(CollectionField::new("b", "missing")),
            CollectionDefinition::new("Broken"),
        ]);

        assert_eq!(registry.error_count(), 2);
        assert!(registry.get("good").is_some());
        assert_eq!(registry.get("half").unwrap().fields.len(), 1);
        assert!(registry.get("Broken").is_none());
        assert_eq!(registry.tables().len(), 2);
    }

    #[test]
    fn invalidate_recompiles_lazily() {
        let registry = registry(vec![
            CollectionDefinition::new("posts").field(CollectionField::new("title", "text")),
        ]);
        let first = registry.get("posts").unwrap();
        registry.invalidate("posts");
        let second = registry.get("posts").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &registry.get("posts").unwrap()));
    }

    #[test]
    fn rebuild_returns_error_count() {
        let registry = registry(vec![
            CollectionDefinition::new("posts").field(CollectionField::new("x", "nope")),
        ]);
        assert_eq!(registry.rebuild(), 1);
        assert_eq!(registry.diagnostics()[0].field.as_deref(), Some("x"));
    }
}
